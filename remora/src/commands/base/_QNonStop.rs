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

#[derive(PartialEq, Debug)]
pub struct QNonStop {
    pub enable: bool,
}

impl ParseCommand for QNonStop {
    fn parse(bytes: BytesMut) -> Option<Self> {
        parse_switch(&bytes).map(|enable| QNonStop { enable })
    }
}
