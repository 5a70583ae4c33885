/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;

use crate::commands::*;

/// Whether we attached to a running process (`1`) or created it (`0`).
/// Without a pid the question is about the current process.
#[derive(PartialEq, Debug)]
pub struct qAttached {
    pub pid: Option<i32>,
}

impl ParseCommand for qAttached {
    fn parse(bytes: BytesMut) -> Option<Self> {
        if bytes.is_empty() {
            return Some(qAttached { pid: None });
        }
        let pid = decode_hex(bytes.strip_prefix(b":")?).ok()?;
        Some(qAttached { pid: Some(pid) })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn optional_pid() {
        assert_eq!(qAttached::parse(BytesMut::new()), Some(qAttached { pid: None }));
        assert_eq!(
            qAttached::parse(BytesMut::from(":3e8")),
            Some(qAttached { pid: Some(1000) })
        );
        assert_eq!(qAttached::parse(BytesMut::from("3e8")), None);
    }
}
