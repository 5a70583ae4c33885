/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;
use thiserror::Error;

use crate::hex::*;
use crate::tdesc::ByteOrder;
use crate::tdesc::TargetDescription;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RegCacheError {
    #[error("No register numbered {0}")]
    InvalidRegister(usize),
    #[error("Register data has {got} bytes, expected {expected}")]
    BadLength { expected: usize, got: usize },
    #[error("Target description has no pc register")]
    NoPc,
    #[error(transparent)]
    Hex(#[from] GdbHexError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    /// The back-end could not provide this register.
    Unavailable,
    Valid,
}

/// Per-thread buffer of raw register bytes.
///
/// A cache starts out with every register unavailable. It is filled by the
/// back-end's `fetch_registers` and serves reads until it is invalidated,
/// which happens whenever the owning thread resumes.
#[derive(Debug, Clone)]
pub struct RegCache {
    tdesc: Arc<TargetDescription>,
    registers: Vec<u8>,
    status: Vec<RegisterStatus>,
    fetched: bool,
    dirty: bool,
}

impl RegCache {
    pub fn new(tdesc: Arc<TargetDescription>) -> Self {
        RegCache {
            registers: vec![0; tdesc.registers_size()],
            status: vec![RegisterStatus::Unavailable; tdesc.num_registers()],
            tdesc,
            fetched: false,
            dirty: false,
        }
    }

    pub fn tdesc(&self) -> &Arc<TargetDescription> {
        &self.tdesc
    }

    /// Whether the cache holds the back-end's current register values.
    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub(crate) fn set_fetched(&mut self, fetched: bool) {
        self.fetched = fetched;
    }

    /// Whether the front-end wrote registers since the last fetch.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn range(&self, regno: usize) -> Result<std::ops::Range<usize>, RegCacheError> {
        let reg = self
            .tdesc
            .registers()
            .get(regno)
            .ok_or(RegCacheError::InvalidRegister(regno))?;
        Ok(reg.offset..reg.offset + reg.size())
    }

    pub fn register_size(&self, regno: usize) -> Result<usize, RegCacheError> {
        self.range(regno).map(|r| r.len())
    }

    pub fn status(&self, regno: usize) -> Option<RegisterStatus> {
        self.status.get(regno).copied()
    }

    /// Supply the value of register `regno`. `None` zero-fills it and marks
    /// it unavailable.
    pub fn supply(&mut self, regno: usize, data: Option<&[u8]>) -> Result<(), RegCacheError> {
        let range = self.range(regno)?;
        match data {
            Some(data) => {
                if data.len() < range.len() {
                    return Err(RegCacheError::BadLength {
                        expected: range.len(),
                        got: data.len(),
                    });
                }
                let len = range.len();
                self.registers[range].copy_from_slice(&data[..len]);
                self.status[regno] = RegisterStatus::Valid;
            }
            None => {
                self.registers[range].fill(0);
                self.status[regno] = RegisterStatus::Unavailable;
            }
        }
        Ok(())
    }

    /// Supply the whole register block at once. `None` marks everything
    /// unavailable.
    pub fn supply_all(&mut self, data: Option<&[u8]>) -> Result<(), RegCacheError> {
        match data {
            Some(data) => {
                if data.len() != self.registers.len() {
                    return Err(RegCacheError::BadLength {
                        expected: self.registers.len(),
                        got: data.len(),
                    });
                }
                self.registers.copy_from_slice(data);
                self.status.fill(RegisterStatus::Valid);
            }
            None => {
                self.registers.fill(0);
                self.status.fill(RegisterStatus::Unavailable);
            }
        }
        Ok(())
    }

    /// Raw bytes of register `regno`.
    pub fn collect(&self, regno: usize) -> Result<&[u8], RegCacheError> {
        let range = self.range(regno)?;
        Ok(&self.registers[range])
    }

    /// The whole raw register buffer, as handed to `store_registers`.
    pub fn raw(&self) -> &[u8] {
        &self.registers
    }

    /// Register `regno` as an integer, truncated to 64 bits.
    pub fn read_u64(&self, regno: usize) -> Result<u64, RegCacheError> {
        let bytes = self.collect(regno)?;
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        Ok(match self.tdesc.byte_order() {
            ByteOrder::Little => {
                buf[..n].copy_from_slice(&bytes[..n]);
                u64::from_le_bytes(buf)
            }
            ByteOrder::Big => {
                buf[8 - n..].copy_from_slice(&bytes[bytes.len() - n..]);
                u64::from_be_bytes(buf)
            }
        })
    }

    /// Store `value` into register `regno`, marking the cache dirty.
    pub fn write_u64(&mut self, regno: usize, value: u64) -> Result<(), RegCacheError> {
        let size = self.register_size(regno)?;
        let mut data = vec![0u8; size];
        let n = size.min(8);
        match self.tdesc.byte_order() {
            ByteOrder::Little => data[..n].copy_from_slice(&value.to_le_bytes()[..n]),
            ByteOrder::Big => data[size - n..].copy_from_slice(&value.to_be_bytes()[8 - n..]),
        }
        self.supply(regno, Some(&data))?;
        self.dirty = true;
        Ok(())
    }

    pub fn read_pc(&self) -> Result<u64, RegCacheError> {
        let pc = self.tdesc.pc_regno().ok_or(RegCacheError::NoPc)?;
        self.read_u64(pc)
    }

    pub fn write_pc(&mut self, pc: u64) -> Result<(), RegCacheError> {
        let regno = self.tdesc.pc_regno().ok_or(RegCacheError::NoPc)?;
        self.write_u64(regno, pc)
    }

    fn put_register(&self, regno: usize, out: &mut String) {
        let reg = &self.tdesc.registers()[regno];
        let bytes = &self.registers[reg.offset..reg.offset + reg.size()];
        if self.status[regno] == RegisterStatus::Valid {
            out.push_str(&encode_hex_string(bytes));
        } else {
            out.extend(std::iter::repeat('x').take(2 * bytes.len()));
        }
    }

    /// Hex form of the whole cache, as sent in a `g` reply. Unavailable
    /// registers are rendered as `x` characters.
    pub fn registers_to_string(&self) -> String {
        let mut out = String::with_capacity(2 * self.registers.len());
        for regno in 0..self.status.len() {
            self.put_register(regno, &mut out);
        }
        out
    }

    /// Hex form of a single register, as sent in a `p` reply.
    pub fn register_to_string(&self, regno: usize) -> Result<String, RegCacheError> {
        self.range(regno)?;
        let mut out = String::new();
        self.put_register(regno, &mut out);
        Ok(out)
    }

    /// Load the cache from a `G` packet body. A register given as all `x`
    /// becomes unavailable.
    pub fn registers_from_string(&mut self, hex: &[u8]) -> Result<(), RegCacheError> {
        if hex.len() != 2 * self.registers.len() {
            return Err(RegCacheError::BadLength {
                expected: 2 * self.registers.len(),
                got: hex.len(),
            });
        }
        for regno in 0..self.status.len() {
            let range = self.range(regno)?;
            self.register_from_hex(regno, &hex[2 * range.start..2 * range.end])?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Load register `regno` from a `P` packet value.
    pub fn register_from_string(&mut self, regno: usize, hex: &[u8]) -> Result<(), RegCacheError> {
        let size = self.register_size(regno)?;
        if hex.len() != 2 * size {
            return Err(RegCacheError::BadLength {
                expected: 2 * size,
                got: hex.len(),
            });
        }
        self.register_from_hex(regno, hex)?;
        self.dirty = true;
        Ok(())
    }

    fn register_from_hex(&mut self, regno: usize, hex: &[u8]) -> Result<(), RegCacheError> {
        if hex.iter().all(|c| *c == b'x' || *c == b'X') {
            self.supply(regno, None)
        } else {
            let bytes = decode_hex_string(hex)?;
            self.supply(regno, Some(&bytes))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn small_tdesc() -> Arc<TargetDescription> {
        Arc::new(
            TargetDescription::new("test", ByteOrder::Little)
                .register("r0", 32, "int")
                .register("pc", 16, "code_ptr")
                .pc("pc"),
        )
    }

    #[test]
    fn starts_unavailable() {
        let cache = RegCache::new(small_tdesc());
        assert!(!cache.is_fetched());
        assert_eq!(cache.status(0), Some(RegisterStatus::Unavailable));
        assert_eq!(cache.registers_to_string(), "xxxxxxxxxxxx");
    }

    #[test]
    fn supply_and_collect() {
        let mut cache = RegCache::new(small_tdesc());
        cache.supply(0, Some(&[1, 2, 3, 4])).unwrap();
        assert_eq!(cache.collect(0).unwrap(), &[1, 2, 3, 4]);
        assert_eq!(cache.registers_to_string(), "01020304xxxx");
        assert_eq!(cache.read_u64(0), Ok(0x04030201));

        cache.supply(0, None).unwrap();
        assert_eq!(cache.collect(0).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(cache.status(0), Some(RegisterStatus::Unavailable));

        assert_eq!(
            cache.supply(0, Some(&[1])),
            Err(RegCacheError::BadLength {
                expected: 4,
                got: 1
            })
        );
        assert_eq!(
            cache.collect(9).unwrap_err(),
            RegCacheError::InvalidRegister(9)
        );
    }

    #[test]
    fn hex_transfer() {
        let mut cache = RegCache::new(small_tdesc());
        cache.registers_from_string(b"efbeaddexxxx").unwrap();
        assert!(cache.is_dirty());
        assert_eq!(cache.read_u64(0), Ok(0xdeadbeef));
        assert_eq!(cache.status(1), Some(RegisterStatus::Unavailable));

        cache.register_from_string(1, b"3412").unwrap();
        assert_eq!(cache.read_pc(), Ok(0x1234));
        assert_eq!(cache.register_to_string(1).unwrap(), "3412");
        assert!(cache.registers_from_string(b"00").is_err());
    }

    #[test]
    fn pc_round_trip_big_endian() {
        let tdesc = Arc::new(
            TargetDescription::new("be", ByteOrder::Big)
                .register("pc", 32, "code_ptr")
                .pc("pc"),
        );
        let mut cache = RegCache::new(tdesc);
        cache.write_pc(0x11223344).unwrap();
        assert_eq!(cache.collect(0).unwrap(), &[0x11, 0x22, 0x33, 0x44]);
        assert_eq!(cache.read_pc(), Ok(0x11223344));
    }
}
