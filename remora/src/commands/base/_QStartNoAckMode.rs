/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::commands::*;

/// Stop acknowledging packets, in both directions, once `OK` is sent.
#[derive(PartialEq, Debug)]
pub struct QStartNoAckMode;

impl ParseCommand for QStartNoAckMode {
    fn parse(bytes: BytesMut) -> Option<Self> {
        bytes.is_empty().then_some(QStartNoAckMode)
    }
}
