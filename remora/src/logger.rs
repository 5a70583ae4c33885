/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::fmt::Debug;

enum Direction {
    In,
    Out,
    Notify,
}

const MAX_BYTES_DISPLAY: usize = 64;

/// `Debug` adaptor used to trace packet bodies without flooding the log.
pub struct PacketLogger<'a> {
    direction: Direction,
    body: &'a [u8],
    checksum: u8,
}

impl<'a> PacketLogger<'a> {
    pub fn incoming<T: 'a + AsRef<[u8]> + ?Sized>(body: &'a T, checksum: u8) -> Self {
        Self {
            direction: Direction::In,
            body: body.as_ref(),
            checksum,
        }
    }

    pub fn outgoing<T: 'a + AsRef<[u8]> + ?Sized>(body: &'a T, checksum: u8) -> Self {
        Self {
            direction: Direction::Out,
            body: body.as_ref(),
            checksum,
        }
    }

    pub fn notification<T: 'a + AsRef<[u8]> + ?Sized>(body: &'a T, checksum: u8) -> Self {
        Self {
            direction: Direction::Notify,
            body: body.as_ref(),
            checksum,
        }
    }
}

impl<'a> Debug for PacketLogger<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.direction {
            Direction::In => write!(f, "<-- ")?,
            Direction::Out => write!(f, "--> ")?,
            Direction::Notify => write!(f, "-%> ")?,
        }

        write!(f, "b\"")?;
        for &b in self.body.iter().take(MAX_BYTES_DISPLAY) {
            match b {
                b'\n' => write!(f, "\\n")?,
                b'\r' => write!(f, "\\r")?,
                b'\t' => write!(f, "\\t")?,
                b'\\' | b'"' => write!(f, "\\{}", b as char)?,
                b'\0' => write!(f, "\\0")?,
                0x20..=0x7e => write!(f, "{}", b as char)?,
                _ => write!(f, "\\x{:02x}", b)?,
            }
        }
        if self.body.len() > MAX_BYTES_DISPLAY {
            write!(f, "[{} bytes omitted]", self.body.len() - MAX_BYTES_DISPLAY)?;
        }
        write!(f, "#{:02x}\"", self.checksum)
    }
}
