// @lint-ignore LICENSELINT
/*
 * MIT License
 *
 * Copyright (c) 2021 Daniel Prilik
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use num_traits::AsPrimitive;
use num_traits::PrimInt;

use crate::error::Error;
use crate::hex::to_hex;
use crate::target::TargetError;

/// Trait to write gdb reply. This is different than `Fmt` for `Display`,
/// As the response must be a valid gdb packet reply, which does not
/// necessarily translate to either.
pub trait WriteResponse {
    /// Write the value into `f` incrementally. The value got written
    /// to `f` must be valid gdb reply packets.
    fn write_response(&self, f: &mut ResponseWriter);
}

/// Empty response, i.e. "not supported".
pub struct ResponseNone;

/// Send "OK" as response
pub struct ResponseOk;

/// Response with serialized `T` as plain data
pub struct ResponseAsPlain<T>(pub T);
/// Response with serialized `T` as GDB hex
pub struct ResponseAsHex<T>(pub T);

impl WriteResponse for ResponseNone {
    fn write_response(&self, _f: &mut ResponseWriter) {}
}

impl WriteResponse for ResponseOk {
    fn write_response(&self, f: &mut ResponseWriter) {
        f.put_str("OK")
    }
}

impl<T> WriteResponse for ResponseAsPlain<T>
where
    T: AsRef<[u8]>,
{
    fn write_response(&self, f: &mut ResponseWriter) {
        f.put_slice(self.0.as_ref())
    }
}

impl<T> WriteResponse for ResponseAsHex<T>
where
    T: AsRef<[u8]>,
{
    fn write_response(&self, f: &mut ResponseWriter) {
        f.put_hex_encoded(self.0.as_ref())
    }
}

impl WriteResponse for TargetError {
    fn write_response(&self, f: &mut ResponseWriter) {
        match self {
            TargetError::Errno(errno) => {
                f.put_str("E");
                f.put_num(*errno as i32);
            }
            TargetError::Unsupported => {}
            TargetError::Died(_) => f.put_str("E03"),
        }
    }
}

impl<T> WriteResponse for Result<T, TargetError>
where
    T: WriteResponse,
{
    fn write_response(&self, f: &mut ResponseWriter) {
        match self {
            Ok(resp) => resp.write_response(f),
            Err(err) => err.write_response(f),
        }
    }
}

impl<T> WriteResponse for Result<T, Error>
where
    T: WriteResponse,
{
    fn write_response(&self, f: &mut ResponseWriter) {
        match self {
            Ok(resp) => resp.write_response(f),
            Err(err) => match err.target_error() {
                Some(err) => err.write_response(f),
                None => f.put_str("E01"),
            },
        }
    }
}

/// Builds the payload of one reply packet. Framing, run-length encoding
/// and the checksum are added when the packet is sent.
#[derive(PartialEq, Eq, Debug)]
pub struct ResponseWriter {
    buf: BytesMut,
    multiprocess: bool,
}

impl ResponseWriter {
    /// Creates a new ResponseWriter. `multiprocess` selects the
    /// `p<pid>.<tid>` thread id syntax.
    pub fn new(multiprocess: bool) -> Self {
        Self {
            buf: BytesMut::new(),
            multiprocess,
        }
    }

    pub fn multiprocess(&self) -> bool {
        self.multiprocess
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn put_u8(&mut self, byte: u8) {
        self.buf.put_u8(byte);
    }

    /// encode u8 as gdb hex
    fn put_u8_hex(&mut self, byte: u8) {
        self.put_u8(to_hex(byte >> 4));
        self.put_u8(to_hex(byte & 0x0f));
    }

    /// Write a slice as is. It must not contain `$`, `#`, `}` or `*`.
    pub fn put_slice(&mut self, s: &[u8]) {
        self.buf.put_slice(s)
    }

    /// Write an entire string.
    pub fn put_str(&mut self, s: &str) {
        self.put_slice(s.as_bytes())
    }

    /// Write data as (gdb) hex string.
    pub fn put_hex_encoded(&mut self, data: &[u8]) {
        data.iter().for_each(|c| self.put_u8_hex(*c));
    }

    /// Write data using the binary protocol.
    pub fn put_binary_encoded(&mut self, data: &[u8]) {
        for &b in data.iter() {
            match b {
                b'#' | b'$' | b'}' | b'*' => {
                    self.put_u8(b'}');
                    self.put_u8(b ^ 0x20)
                }
                _ => self.put_u8(b),
            }
        }
    }

    /// Write a number as a big-endian hex string using the most compact
    /// representation possible (i.e: trimming leading zeros).
    pub fn put_num<I: AsPrimitive<u64> + PrimInt>(&mut self, digit: I) {
        if digit.is_zero() {
            return self.put_u8_hex(0);
        }

        let mut buf = [0; 16];
        let mut k = 15;
        let mut x = digit;

        while !x.is_zero() {
            buf[k] = (x.as_() & 0xffu64) as u8;
            k -= 1;
            x = x.unsigned_shr(8);
        }

        self.put_hex_encoded(&buf[1 + k..]);
    }

    /// Consumes self, returning the payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nix::errno::Errno;
    use nix::unistd::Pid;

    fn render<T: WriteResponse>(resp: T) -> Bytes {
        let mut writer = ResponseWriter::new(true);
        resp.write_response(&mut writer);
        writer.finish()
    }

    #[test]
    fn response_plain_string() {
        let mut left = ResponseWriter::new(true);
        let mut right = ResponseWriter::new(true);
        left.put_str("just a test");
        ResponseAsPlain("just a test").write_response(&mut right);
        assert_eq!(left, right);
    }

    #[test]
    fn numbers_and_encodings() {
        let mut writer = ResponseWriter::new(false);
        writer.put_num(0);
        writer.put_str(",");
        writer.put_num(0x1234u32);
        writer.put_str(",");
        writer.put_hex_encoded(b"OK");
        writer.put_str(",");
        writer.put_binary_encoded(b"a*b#");
        assert_eq!(writer.finish(), Bytes::from_static(b"00,1234,4f4b,a}\x0ab}\x03"));
    }

    #[test]
    fn error_replies() {
        assert_eq!(
            render(Err::<ResponseOk, _>(TargetError::Errno(Errno::EFAULT))),
            Bytes::from_static(b"E0e")
        );
        assert_eq!(
            render(Err::<ResponseOk, _>(TargetError::Unsupported)),
            Bytes::new()
        );
        assert_eq!(
            render(Err::<ResponseOk, _>(TargetError::Died(Pid::from_raw(1)))),
            Bytes::from_static(b"E03")
        );
        assert_eq!(render(Ok::<_, TargetError>(ResponseOk)), Bytes::from_static(b"OK"));
        assert_eq!(
            render(Err::<ResponseOk, _>(Error::Detached)),
            Bytes::from_static(b"E01")
        );
    }
}
