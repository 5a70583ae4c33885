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
pub enum qSymbol {
    /// `qSymbol::`, the debugger is ready to look up symbols.
    Ready,
    /// `qSymbol:<value>:<name>`; the value is missing for unknown symbols.
    Value { name: String, addr: Option<u64> },
}

impl ParseCommand for qSymbol {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let rest = bytes.strip_prefix(b":")?;
        if rest == b":" {
            return Some(qSymbol::Ready);
        }
        let colon = rest.iter().position(|c| *c == b':')?;
        let (value, name) = (&rest[..colon], &rest[colon + 1..]);
        let name = String::from_utf8(decode_hex_string(name).ok()?).ok()?;
        if name.is_empty() {
            return None;
        }
        let addr = if value.is_empty() {
            None
        } else {
            Some(decode_hex(value).ok()?)
        };
        Some(qSymbol::Value { name, addr })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_qsymbol() {
        assert_eq!(qSymbol::parse(BytesMut::from("::")), Some(qSymbol::Ready));
        assert_eq!(
            qSymbol::parse(BytesMut::from(":7ffff7dd1000:6d61696e")),
            Some(qSymbol::Value {
                name: String::from("main"),
                addr: Some(0x7ffff7dd1000),
            })
        );
        assert_eq!(
            qSymbol::parse(BytesMut::from("::6d61696e")),
            Some(qSymbol::Value {
                name: String::from("main"),
                addr: None,
            })
        );
        assert_eq!(qSymbol::parse(BytesMut::from(":1000")), None);
    }
}
