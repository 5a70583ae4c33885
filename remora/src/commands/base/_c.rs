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

/// Continue, optionally from a new address.
#[derive(PartialEq, Debug)]
pub struct c {
    pub addr: Option<u64>,
}

impl ParseCommand for c {
    fn parse(bytes: BytesMut) -> Option<Self> {
        if bytes.is_empty() {
            Some(c { addr: None })
        } else {
            let addr = decode_hex(&bytes).ok()?;
            Some(c { addr: Some(addr) })
        }
    }
}
