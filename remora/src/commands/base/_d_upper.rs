/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BytesMut;
use nix::unistd::Pid;

use crate::commands::*;

/// Detach from one process (`D;<pid>`, multiprocess) or from all of them.
#[derive(PartialEq, Debug)]
pub struct D {
    pub pid: Option<Pid>,
}

impl ParseCommand for D {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let pid = match bytes.strip_prefix(b";") {
            Some(pid) => Some(Pid::from_raw(decode_hex(pid).ok()?)),
            None if bytes.is_empty() => None,
            None => return None,
        };
        Some(D { pid })
    }
}
