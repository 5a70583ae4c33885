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

/// Write all registers. The hex text is handed to the register cache as
/// is, since only the cache knows the layout.
#[derive(PartialEq, Debug)]
pub struct G {
    pub vals: Bytes,
}

impl ParseCommand for G {
    fn parse(bytes: BytesMut) -> Option<Self> {
        if bytes.is_empty() || bytes.len() % 2 != 0 {
            None
        } else {
            Some(G {
                vals: bytes.freeze(),
            })
        }
    }
}
