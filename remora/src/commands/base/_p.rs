/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::commands::*;

/// Read a single register.
#[derive(PartialEq, Debug)]
pub struct p {
    pub reg_id: usize,
}

impl ParseCommand for p {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let reg_id = decode_hex(&bytes).ok()?;
        Some(p { reg_id })
    }
}
