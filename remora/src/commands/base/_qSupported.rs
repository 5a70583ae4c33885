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

#[derive(PartialEq, Debug)]
pub struct qSupported {
    pub features: Bytes,
}

impl qSupported {
    /// Whether the debugger announced `feature+`.
    pub fn supports(&self, feature: &str) -> bool {
        self.features
            .split(|c| *c == b';' || *c == b':')
            .any(|f| f.strip_suffix(b"+") == Some(feature.as_bytes()))
    }
}

impl ParseCommand for qSupported {
    fn parse(bytes: BytesMut) -> Option<Self> {
        if bytes.is_empty() || bytes.starts_with(b":") {
            Some(qSupported {
                features: bytes.freeze(),
            })
        } else {
            None
        }
    }
}
