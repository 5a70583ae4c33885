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

/// Is the thread alive?
#[derive(PartialEq, Debug)]
pub struct T {
    pub id: ThreadId,
}

impl ParseCommand for T {
    fn parse(bytes: BytesMut) -> Option<Self> {
        let id = ThreadId::decode(&bytes)?;
        Some(T { id })
    }
}
