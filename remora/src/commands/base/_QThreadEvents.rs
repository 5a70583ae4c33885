/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use super::parse_switch;
use crate::commands::*;

/// Turn reporting of thread creation and exit on or off.
#[derive(PartialEq, Debug)]
pub struct QThreadEvents {
    pub enable: bool,
}

impl ParseCommand for QThreadEvents {
    fn parse(bytes: BytesMut) -> Option<Self> {
        parse_switch(&bytes).map(|enable| QThreadEvents { enable })
    }
}
