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

#[derive(PartialEq, Debug)]
pub struct M {
    pub addr: u64,
    pub length: usize,
    pub vals: Vec<u8>,
}

impl ParseCommand for M {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let colon = bytes.iter().position(|c| *c == b':')?;
        let (addr_len, vals) = bytes.split_at(colon);
        let mut iter = addr_len.split(|c| *c == b',');
        let addr = iter.next().and_then(|x| decode_hex(x).ok())?;
        let length = iter.next().and_then(|x| decode_hex(x).ok())?;
        let vals = decode_hex_string(&vals[1..]).ok()?;
        if vals.len() != length {
            return None;
        }
        Some(M { addr, length, vals })
    }
}
