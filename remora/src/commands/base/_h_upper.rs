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
pub struct H {
    pub op: ThreadOp,
    pub id: ThreadId,
}

impl ParseCommand for H {
    fn parse(mut bytes: BytesMut) -> Option<Self> {
        if bytes.is_empty() {
            None
        } else {
            let (ch, bytes) = bytes.split_first_mut()?;
            let op = match *ch {
                b'c' => Some(ThreadOp::c),
                b'g' => Some(ThreadOp::g),
                b'G' => Some(ThreadOp::G),
                b'm' => Some(ThreadOp::m),
                b'M' => Some(ThreadOp::M),
                _ => None,
            }?;
            let id = ThreadId::decode(bytes)?;
            Some(H { op, id })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_h() {
        assert_eq!(
            H::parse(BytesMut::from("gp7b.7c")),
            Some(H {
                op: ThreadOp::g,
                id: ThreadId::pid_tid(0x7b, 0x7c),
            })
        );
        assert_eq!(
            H::parse(BytesMut::from("c-1")),
            Some(H {
                op: ThreadOp::c,
                id: ThreadId::all(),
            })
        );
        assert_eq!(
            H::parse(BytesMut::from("g0")),
            Some(H {
                op: ThreadOp::g,
                id: ThreadId::any(),
            })
        );
        assert_eq!(H::parse(BytesMut::from("x0")), None);
    }
}
