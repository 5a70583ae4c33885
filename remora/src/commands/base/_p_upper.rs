/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::Bytes;
use bytes::BytesMut;

use crate::commands::*;

/// Write a single register, `P<n>=<hex>`.
#[derive(PartialEq, Debug)]
pub struct P {
    pub reg_id: usize,
    pub val: Bytes,
}

impl ParseCommand for P {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        let eq = bytes.iter().position(|c| *c == b'=')?;
        let reg_id = decode_hex(&bytes[..eq]).ok()?;
        let val = bytes.split_off(eq + 1).freeze();
        if val.is_empty() {
            return None;
        }
        Some(P { reg_id, val })
    }
}
