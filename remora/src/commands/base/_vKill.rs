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

#[derive(PartialEq, Debug)]
pub struct vKill {
    pub pid: Pid,
}

impl ParseCommand for vKill {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let pid = decode_hex(bytes.strip_prefix(b";")?).ok()?;
        Some(vKill {
            pid: Pid::from_raw(pid),
        })
    }
}
