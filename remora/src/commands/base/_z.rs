/*
 * Copyright (c) Meta Platforms, Inc. and its affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::target::PointKind;
use crate::commands::*;

#[derive(PartialEq, Debug)]
pub struct z {
    pub kind: PointKind,
    pub addr: u64,
    /// Instruction length for code breakpoints, byte count for watchpoints.
    pub size: usize,
}

impl ParseCommand for z {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        let mut iter = bytes.split_mut(|c| *c == b',');
        let kind = iter
            .next()
            .and_then(|s| decode_hex(s).ok())
            .and_then(PointKind::new)?;
        let addr = iter.next().and_then(|s| decode_hex(s).ok())?;
        let size = iter.next().and_then(|s| decode_hex(s).ok())?;

        Some(z { kind, addr, size })
    }
}
