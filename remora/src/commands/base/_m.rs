/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::commands::*;

/// Read `length` bytes at `addr`.
#[derive(PartialEq, Debug)]
pub struct m {
    pub addr: u64,
    pub length: usize,
}

impl ParseCommand for m {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let comma = bytes.iter().position(|c| *c == b',')?;
        Some(m {
            addr: decode_hex(&bytes[..comma]).ok()?,
            length: decode_hex(&bytes[comma + 1..]).ok()?,
        })
    }
}
