/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use thiserror::Error;

use crate::hex::*;

/// Out-of-band interrupt request (`^C`).
pub const INTERRUPT: u8 = 0x03;

/// Largest repeat count a single run-length token may carry.
const MAX_RUN: usize = 97;

/// Offset added to a repeat count to make it printable.
const RUN_BIAS: u8 = 29;

/// Packet parse error.
#[derive(PartialEq, Eq, Debug, Error, Clone)]
pub enum PacketParseError {
    #[error("Checksum mismatch, expected: {checksum}, got: {calculated}")]
    ChecksumMismatched { checksum: u8, calculated: u8 },
    #[error("empty packet buffer")]
    EmptyBuf,
    #[error("missing checksum")]
    MissingChecksum,
    #[error("mulformed checksum")]
    MalformedChecksum,
    #[error("run-length token without a preceding byte or count")]
    MalformedRunLength,
    #[error("payload byte {0:#04x} is reserved for framing")]
    ReservedByte(u8),
    #[error("unexpected header {0}")]
    UnexpectedHeader(u8),
    #[error(transparent)]
    DecodeHexError(#[from] GdbHexError),
}

/// Sum of `data` modulo 256.
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |a, x| a.wrapping_add(*x))
}

// Emits `run[0]` and, when worthwhile, a `*` token covering the following
// identical bytes. Returns the number of input bytes consumed.
fn put_run(out: &mut BytesMut, run: &[u8]) -> usize {
    out.put_u8(run[0]);

    let limit = run.len().min(MAX_RUN);
    let mut n = run[1..limit].iter().take_while(|&&b| b == run[0]).count();
    if n < 3 {
        return 1;
    }
    // The repeat count must never look like a frame delimiter.
    while n as u8 + RUN_BIAS == b'$' || n as u8 + RUN_BIAS == b'#' {
        n -= 1;
    }
    out.put_u8(b'*');
    out.put_u8(n as u8 + RUN_BIAS);
    n + 1
}

/// Frame `payload` for the wire: `$payload#cs`, or `%payload#cs` for an
/// unsolicited notification. The payload is run-length compressed and the
/// checksum covers the compressed bytes.
///
/// `$`, `#` and `*` cannot appear in a payload and are rejected; binary
/// data is escaped by the response writer before it gets here.
pub fn encode_packet(payload: &[u8], is_notification: bool) -> Result<Bytes, PacketParseError> {
    if let Some(&b) = payload.iter().find(|b| is_reserved(**b)) {
        return Err(PacketParseError::ReservedByte(b));
    }

    let mut out = BytesMut::with_capacity(payload.len() + 4);
    out.put_u8(if is_notification { b'%' } else { b'$' });

    let mut i = 0;
    while i < payload.len() {
        i += put_run(&mut out, &payload[i..]);
    }

    let cs = checksum(&out[1..]);
    out.put_u8(b'#');
    out.put_u8(to_hex(cs >> 4));
    out.put_u8(to_hex(cs));
    Ok(out.freeze())
}

fn is_reserved(b: u8) -> bool {
    matches!(b, b'$' | b'#' | b'*')
}

/// Expand `*` run-length tokens in a received packet body.
pub fn expand_run_length(body: &[u8]) -> Result<BytesMut, PacketParseError> {
    let mut out = BytesMut::with_capacity(body.len());
    let mut iter = body.iter();

    while let Some(&b) = iter.next() {
        if b != b'*' {
            out.put_u8(b);
            continue;
        }
        let prev = *out.last().ok_or(PacketParseError::MalformedRunLength)?;
        let count = iter
            .next()
            .and_then(|c| c.checked_sub(RUN_BIAS))
            .ok_or(PacketParseError::MalformedRunLength)?;
        out.put_bytes(prev, count as usize);
    }
    Ok(out)
}

// Split `$body#xx` into the body and the received checksum.
fn split_frame(bytes: &[u8]) -> Result<(&[u8], u8), PacketParseError> {
    match bytes.first() {
        None => return Err(PacketParseError::EmptyBuf),
        Some(b'$') | Some(b'%') => {}
        Some(&other) => return Err(PacketParseError::UnexpectedHeader(other)),
    }
    let end_of_body = bytes
        .iter()
        .position(|b| *b == b'#')
        .ok_or(PacketParseError::MissingChecksum)?;
    let checksum = bytes
        .get(end_of_body + 1..end_of_body + 3)
        .ok_or(PacketParseError::MissingChecksum)?;
    let checksum = decode_hex(checksum).map_err(|_| PacketParseError::MalformedChecksum)?;
    Ok((&bytes[1..end_of_body], checksum))
}

/// Remove the leading `$` and trailing `#xx`, validate the checksum and
/// expand run-length tokens.
pub fn decode_packet(bytes: &[u8]) -> Result<BytesMut, PacketParseError> {
    let (body, checksum) = split_frame(bytes)?;

    let calculated = self::checksum(body);
    if calculated != checksum {
        return Err(PacketParseError::ChecksumMismatched {
            checksum,
            calculated,
        });
    }

    expand_run_length(body)
}

/// A unit read from the front-end byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nack,
    Interrupt,
    Packet(BytesMut),
    /// A packet whose checksum did not verify. The payload is still
    /// recovered so it can be used when acknowledgements are disabled.
    Corrupt {
        payload: BytesMut,
        error: PacketParseError,
    },
}

/// Incremental decoder turning raw transport bytes into [`Frame`]s.
#[derive(Default)]
pub struct PacketDecoder {
    buf: BytesMut,
}

impl PacketDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let first = *self.buf.first()?;
            match first {
                b'+' => {
                    let _ = self.buf.split_to(1);
                    return Some(Frame::Ack);
                }
                b'-' => {
                    let _ = self.buf.split_to(1);
                    return Some(Frame::Nack);
                }
                INTERRUPT => {
                    let _ = self.buf.split_to(1);
                    return Some(Frame::Interrupt);
                }
                b'$' | b'%' => {
                    let hash = self.buf.iter().position(|b| *b == b'#')?;
                    if self.buf.len() < hash + 3 {
                        return None;
                    }
                    let raw = self.buf.split_to(hash + 3);
                    return Some(Self::decode_frame(&raw));
                }
                other => {
                    tracing::warn!("skipping stray byte {:#04x} between packets", other);
                    let _ = self.buf.split_to(1);
                }
            }
        }
    }

    fn decode_frame(raw: &[u8]) -> Frame {
        match decode_packet(raw) {
            Ok(payload) => Frame::Packet(payload),
            Err(error) => {
                let payload = split_frame(raw)
                    .ok()
                    .and_then(|(body, _)| expand_run_length(body).ok())
                    .unwrap_or_default();
                Frame::Corrupt { payload, error }
            }
        }
    }
}
