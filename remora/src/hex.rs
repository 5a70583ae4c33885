/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use num_traits::CheckedAdd;
use num_traits::CheckedMul;
use num_traits::FromPrimitive;
use num_traits::Zero;
use thiserror::Error;

/// Decode gdb hex error code
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GdbHexError {
    /// Invalid hex digit
    #[error("Input contains non-hex chars")]
    NotHex,
    /// Input is empty
    #[error("Input is empty")]
    Empty,
    /// Output is too small: overflowed
    #[error("Output is too small/overflowed")]
    Overflow,
    /// Invalid Hex input
    #[error("Gdb hex is malformed")]
    InvalidGdbHex,
    /// Invalid binary inpput
    #[error("Gdb binary is malformed")]
    InvalidGdbBinary,
    /// Invalid Output (num) type.
    #[error("Invalid output num type")]
    InvalidOutput,
}

pub(crate) fn from_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

pub(crate) fn to_hex(nibble: u8) -> u8 {
    match nibble & 0xf {
        d @ 0..=9 => b'0' + d,
        d => b'a' + d - 10,
    }
}

/// Decode a GDB hex string into the specified integer.
pub fn decode_hex<I>(buf: &[u8]) -> Result<I, GdbHexError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    if buf.is_empty() {
        return Err(GdbHexError::Empty);
    }

    let radix = I::from_u8(16).ok_or(GdbHexError::InvalidOutput)?;
    let mut result = I::zero();

    for &digit in buf {
        let x = I::from_u8(from_hex(digit).ok_or(GdbHexError::NotHex)?)
            .ok_or(GdbHexError::InvalidOutput)?;
        result = result.checked_mul(&radix).ok_or(GdbHexError::Overflow)?;
        result = result.checked_add(&x).ok_or(GdbHexError::Overflow)?
    }

    Ok(result)
}

/// Decode a possibly negative hex number such as `-1`, as used by thread ids.
pub fn decode_signed_hex(buf: &[u8]) -> Result<i64, GdbHexError> {
    match buf.split_first() {
        Some((b'-', rest)) => decode_hex::<i64>(rest).map(|x| -x),
        _ => decode_hex(buf),
    }
}

/// Decode a GDB hex string into a u8 Vector.
///
/// GDB hex strings may include "xx", which represent "missing" data. This
/// method simply treats "xx" as 00.
pub fn decode_hex_string(buf: &[u8]) -> Result<Vec<u8>, GdbHexError> {
    if buf.len() % 2 != 0 {
        return Err(GdbHexError::InvalidGdbHex);
    }

    buf.chunks_exact(2)
        .map(|pair| match pair {
            [b'x', b'x'] | [b'X', b'X'] => Ok(0),
            [hi, lo] => {
                let hi = from_hex(*hi).ok_or(GdbHexError::NotHex)?;
                let lo = from_hex(*lo).ok_or(GdbHexError::NotHex)?;
                Ok(hi << 4 | lo)
            }
            _ => unreachable!(),
        })
        .collect()
}

/// Encode `data` as lowercase hex digits, two per byte.
pub fn encode_hex_string(data: &[u8]) -> String {
    let mut res = String::with_capacity(2 * data.len());
    for &b in data {
        res.push(to_hex(b >> 4) as char);
        res.push(to_hex(b) as char);
    }
    res
}

/// Decode a GDB binary string into a u8 Vector.
///
/// Bytes escaped with `}` are XOR'ed with 0x20.
pub fn decode_binary_string(buf: &[u8]) -> Result<Vec<u8>, GdbHexError> {
    let mut res = Vec::with_capacity(buf.len());
    let mut i = 0;

    while i < buf.len() {
        match buf[i] {
            b'}' => {
                if i >= buf.len() - 1 {
                    return Err(GdbHexError::InvalidGdbBinary);
                }
                res.push(buf[i + 1] ^ 0x20);
                i += 2;
            }
            _ => {
                res.push(buf[i]);
                i += 1;
            }
        }
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_gdb_hex_test() {
        assert_eq!(
            decode_hex_string(b"31323334"),
            Ok::<_, GdbHexError>(b"1234".to_vec())
        );
        assert_eq!(
            decode_hex_string(b"12345"),
            Err::<Vec<u8>, _>(GdbHexError::InvalidGdbHex)
        );
        assert_eq!(decode_hex_string(b"xx01"), Ok(vec![0, 1]));
        assert_eq!(decode_hex_string(b"zz"), Err(GdbHexError::NotHex));
    }

    #[test]
    fn decode_numbers() {
        assert_eq!(decode_hex::<u64>(b"7ffff7fe3340"), Ok(0x7ffff7fe3340));
        assert_eq!(decode_hex::<u8>(b"100"), Err(GdbHexError::Overflow));
        assert_eq!(decode_hex::<u32>(b""), Err(GdbHexError::Empty));
        assert_eq!(decode_signed_hex(b"-1"), Ok(-1));
        assert_eq!(decode_signed_hex(b"1f"), Ok(0x1f));
    }

    #[test]
    fn encode_gdb_hex_test() {
        assert_eq!(encode_hex_string(&[0xde, 0xad, 0x00, 0x0f]), "dead000f");
        assert_eq!(encode_hex_string(&[]), "");
    }

    #[test]
    fn decode_gdb_binary_test() {
        assert_eq!(
            decode_binary_string(b"12345"),
            Ok::<_, GdbHexError>(b"12345".to_vec())
        );
        assert_eq!(
            decode_binary_string(b"1234}"),
            Err::<Vec<u8>, _>(GdbHexError::InvalidGdbBinary)
        );
        assert_eq!(
            decode_binary_string(b"1234}A"),
            Ok::<_, GdbHexError>(b"1234a".to_vec())
        );
    }
}
