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

use crate::target::PointKind;
use crate::commands::*;

#[derive(PartialEq, Debug)]
pub struct Z {
    pub kind: PointKind,
    pub addr: u64,
    pub size: usize,
    /// Condition and command lists, starting at the first `;`.
    pub options: Bytes,
}

impl ParseCommand for Z {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        let options = match bytes.iter().position(|c| *c == b';') {
            Some(semi) => bytes.split_off(semi).freeze(),
            None => Bytes::new(),
        };
        let mut iter = bytes.split_mut(|c| *c == b',');
        let kind = iter
            .next()
            .and_then(|s| decode_hex(s).ok())
            .and_then(PointKind::new)?;
        let addr = iter.next().and_then(|s| decode_hex(s).ok())?;
        let size = iter.next().and_then(|s| decode_hex(s).ok())?;

        Some(Z {
            kind,
            addr,
            size,
            options,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_with_options() {
        assert_eq!(
            Z::parse(BytesMut::from("0,401136,1;X3,220027;cmds:0,X3,220127")),
            Some(Z {
                kind: PointKind::Software,
                addr: 0x401136,
                size: 1,
                options: Bytes::from_static(b";X3,220027;cmds:0,X3,220127"),
            })
        );
        assert_eq!(
            Z::parse(BytesMut::from("2,7ffe0010,8")),
            Some(Z {
                kind: PointKind::WriteWatch,
                addr: 0x7ffe0010,
                size: 8,
                options: Bytes::new(),
            })
        );
        assert_eq!(Z::parse(BytesMut::from("7,1000,1")), None);
    }
}
