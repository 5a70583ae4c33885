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
pub enum qXfer {
    FeaturesRead {
        annex: String,
        offset: usize,
        len: usize,
    },
}

impl ParseCommand for qXfer {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        if bytes.starts_with(b":features:read:") {
            let mut iter =
                bytes[b":features:read:".len()..].split_mut(|c| *c == b':' || *c == b',');
            let annex = iter.next()?;
            let annex = String::from_utf8(annex.to_vec()).ok()?;
            let offset = iter.next()?;
            let len = iter.next()?;
            Some(qXfer::FeaturesRead {
                annex,
                offset: decode_hex(offset).ok()?,
                len: decode_hex(len).ok()?,
            })
        } else {
            None
        }
    }
}
