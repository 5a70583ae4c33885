/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Memory access through the shadows of everything we patched into the
//! inferior's code.
//!
//! Reads see the original bytes under jumps and software breakpoints.
//! Writes update those saved bytes instead, and keep our instructions in
//! place in memory. Jumps are applied first and breakpoints on top, so a
//! breakpoint inserted over a jump remembers the original code rather than
//! the jump.

use super::*;
use crate::ax::AgentMemory;

/// Overlap of the object at `[obj, obj + obj_len)` with the access at
/// `[addr, addr + len)`, as (offset into the object, offset into the
/// access, length).
fn overlap(obj: u64, obj_len: usize, addr: u64, len: usize) -> Option<(usize, usize, usize)> {
    let obj_end = obj.saturating_add(obj_len as u64);
    let end = addr.saturating_add(len as u64);
    if addr >= obj_end || obj >= end {
        return None;
    }
    let start = obj.max(addr);
    let stop = obj_end.min(end);
    Some((
        (start - obj) as usize,
        (start - addr) as usize,
        (stop - start) as usize,
    ))
}

impl BreakpointTable {
    /// Check that an inserted software breakpoint is still in memory. If it
    /// is not, it is marked gone and false is returned.
    pub(super) fn validate_inserted(&mut self, target: &mut dyn Target, id: RawId) -> bool {
        let (addr, size) = match self.raw.get(id) {
            Some(raw) => (raw.addr, raw.size),
            None => return false,
        };
        let live = target.read_memory(addr, size);
        let raw = match self.raw.get_mut(id) {
            Some(raw) => raw,
            None => return false,
        };
        match live {
            Ok(bytes) if bytes == raw.opcode => true,
            _ => {
                tracing::debug!("breakpoint at {:#x} is gone from memory", addr);
                raw.state = InsertState::Gone;
                false
            }
        }
    }

    fn software_raw(&self) -> Vec<RawId> {
        self.raw
            .iter()
            .filter(|(_, raw)| raw.kind == PointKind::Software)
            .map(|(id, _)| id)
            .collect()
    }

    /// Replace our instructions in `buf`, just read from `addr`, with the
    /// bytes they cover.
    pub fn check_mem_read(&mut self, target: &mut dyn Target, addr: u64, buf: &mut [u8]) {
        for (_, jump) in self.jumps.iter() {
            if !jump.inserted {
                continue;
            }
            if let Some((at, offset, len)) = overlap(jump.addr, jump.len(), addr, buf.len()) {
                buf[offset..offset + len].copy_from_slice(&jump.shadow[at..at + len]);
            }
        }

        let mut disabled = false;
        for id in self.software_raw() {
            let (raw_addr, size, state) = match self.raw.get(id) {
                Some(raw) => (raw.addr, raw.size, raw.state),
                None => continue,
            };
            let (at, offset, len) = match overlap(raw_addr, size, addr, buf.len()) {
                Some(o) => o,
                None => continue,
            };
            if state != InsertState::Inserted {
                continue;
            }
            if !self.validate_inserted(target, id) {
                disabled = true;
                continue;
            }
            if let Some(raw) = self.raw.get(id) {
                buf[offset..offset + len].copy_from_slice(&raw.shadow[at..at + len]);
            }
        }

        if disabled {
            self.delete_disabled_breakpoints(target);
        }
    }

    /// Fold `data`, about to be written at `addr`, into the shadows it
    /// overlaps and return what must actually go to memory.
    pub fn check_mem_write(&mut self, target: &mut dyn Target, addr: u64, data: &[u8]) -> Vec<u8> {
        let mut buf = data.to_vec();

        for (_, jump) in self.jumps.iter_mut() {
            if let Some((at, offset, len)) = overlap(jump.addr, jump.len(), addr, data.len()) {
                jump.shadow[at..at + len].copy_from_slice(&data[offset..offset + len]);
                if jump.inserted {
                    buf[offset..offset + len].copy_from_slice(&jump.insn[at..at + len]);
                }
            }
        }

        let mut disabled = false;
        for id in self.software_raw() {
            let (at, offset, len) = match self
                .raw
                .get(id)
                .and_then(|raw| overlap(raw.addr, raw.size, addr, data.len()))
            {
                Some(o) => o,
                None => continue,
            };
            let inserted = match self.raw.get_mut(id) {
                Some(raw) => {
                    if raw.shadow.len() >= at + len {
                        raw.shadow[at..at + len].copy_from_slice(&data[offset..offset + len]);
                    }
                    raw.state == InsertState::Inserted
                }
                None => continue,
            };
            if !inserted {
                continue;
            }
            if !self.validate_inserted(target, id) {
                disabled = true;
                continue;
            }
            if let Some(raw) = self.raw.get(id) {
                buf[offset..offset + len].copy_from_slice(&raw.opcode[at..at + len]);
            }
        }

        if disabled {
            self.delete_disabled_breakpoints(target);
        }
        buf
    }

    /// Read inferior memory as the debugger should see it.
    pub fn read_memory(
        &mut self,
        target: &mut dyn Target,
        addr: u64,
        buf: &mut [u8],
    ) -> Result<(), TargetError> {
        let bytes = target.read_memory(addr, buf.len())?;
        if bytes.len() != buf.len() {
            return Err(TargetError::Errno(nix::errno::Errno::EIO));
        }
        buf.copy_from_slice(&bytes);
        self.check_mem_read(target, addr, buf);
        Ok(())
    }

    /// Write inferior memory on behalf of the debugger, keeping our
    /// instructions in place.
    pub fn write_memory(
        &mut self,
        target: &mut dyn Target,
        addr: u64,
        data: &[u8],
    ) -> Result<(), TargetError> {
        let buf = self.check_mem_write(target, addr, data);
        target.write_memory(addr, &buf)
    }

    /// Re-check every inserted software breakpoint against memory and drop
    /// the ones that are gone.
    pub fn validate_breakpoints(&mut self, target: &mut dyn Target) {
        for id in self.software_raw() {
            if self.raw.get(id).map(|raw| raw.state) == Some(InsertState::Inserted) {
                self.validate_inserted(target, id);
            }
        }
        self.delete_disabled_breakpoints(target);
    }

    /// Delete the breakpoints whose raw breakpoint is gone.
    pub fn delete_disabled_breakpoints(&mut self, target: &mut dyn Target) {
        for id in self.breakpoints.keys() {
            let gone = self.raw_of(id).map(|raw| raw.state) == Some(InsertState::Gone);
            if !gone {
                continue;
            }
            if self.breakpoints.get(id).map(|bp| bp.ty) == Some(BreakpointType::Reinsert) {
                tracing::error!("single-step breakpoint vanished from memory");
            }
            if let Err(err) = self.delete_breakpoint(target, id) {
                tracing::warn!("deleting disabled breakpoint: {}", err);
            }
        }
        let pruned = self
            .raw
            .retain(|_, raw| !(raw.state == InsertState::Gone && raw.refcount == 0));
        if !pruned.is_empty() {
            tracing::debug!("pruned {} gone raw breakpoints", pruned.len());
        }
    }
}

/// Inferior memory seen through a process's breakpoint shadows, for agent
/// expressions.
pub struct ShadowedMemory<'a> {
    table: &'a mut BreakpointTable,
    target: &'a mut dyn Target,
}

impl<'a> ShadowedMemory<'a> {
    pub fn new(table: &'a mut BreakpointTable, target: &'a mut dyn Target) -> Self {
        ShadowedMemory { table, target }
    }
}

impl AgentMemory for ShadowedMemory<'_> {
    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TargetError> {
        let mut buf = vec![0; len];
        self.table.read_memory(&mut *self.target, addr, &mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FakeTarget;
    use crate::testing::TRAP;

    const ADDR: u64 = 0x2000;
    const CODE: [u8; 8] = [0x55, 0x48, 0x89, 0xe5, 0x48, 0x83, 0xec, 0x10];

    fn setup() -> (BreakpointTable, FakeTarget) {
        let mut target = FakeTarget::new();
        target.poke(ADDR, &CODE);
        (BreakpointTable::new(), target)
    }

    fn read(table: &mut BreakpointTable, target: &mut FakeTarget, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        table.read_memory(target, addr, &mut buf).unwrap();
        buf
    }

    #[test]
    fn overlaps() {
        assert_eq!(overlap(10, 4, 0, 10), None);
        assert_eq!(overlap(10, 4, 14, 10), None);
        assert_eq!(overlap(10, 4, 0, 11), Some((0, 10, 1)));
        assert_eq!(overlap(10, 4, 12, 10), Some((2, 0, 2)));
        assert_eq!(overlap(10, 4, 11, 1), Some((1, 0, 1)));
        assert_eq!(overlap(10, 4, 8, 10), Some((0, 2, 4)));
    }

    #[test]
    fn reads_hide_breakpoints() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR + 1, None).unwrap();
        table.set_breakpoint_at(&mut target, ADDR + 7, None).unwrap();
        assert_eq!(target.peek(ADDR + 1, 1), vec![TRAP]);
        assert_eq!(read(&mut table, &mut target, ADDR, 8), CODE.to_vec());
        // Partial overlaps.
        assert_eq!(read(&mut table, &mut target, ADDR + 1, 1), vec![0x48]);
        assert_eq!(read(&mut table, &mut target, ADDR + 6, 2), vec![0xec, 0x10]);
    }

    #[test]
    fn writes_update_the_shadow() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR + 2, None).unwrap();
        table
            .write_memory(&mut target, ADDR, &[1, 2, 3, 4])
            .unwrap();
        // The trap stays in memory, the new byte goes to the shadow.
        assert_eq!(target.peek(ADDR, 4), vec![1, 2, TRAP, 4]);
        assert_eq!(read(&mut table, &mut target, ADDR, 4), vec![1, 2, 3, 4]);

        table.uninsert_all_breakpoints(&mut target);
        assert_eq!(target.peek(ADDR, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn writes_to_uninserted_breakpoints_reach_memory() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        table.uninsert_breakpoints_at(&mut target, ADDR);
        table.write_memory(&mut target, ADDR, &[0xaa]).unwrap();
        assert_eq!(target.peek(ADDR, 1), vec![0xaa]);
        table.reinsert_breakpoints_at(&mut target, ADDR);
        assert_eq!(target.peek(ADDR, 1), vec![TRAP]);
        assert_eq!(read(&mut table, &mut target, ADDR, 1), vec![0xaa]);
    }

    #[test]
    fn breakpoint_over_jump() {
        let (mut table, mut target) = setup();
        let insn = [0xe9, 0x10, 0x20, 0x30, 0x40];
        let jump = table
            .set_fast_tracepoint_jump(&mut target, ADDR, &insn)
            .unwrap();
        assert_eq!(target.peek(ADDR, 5), insn.to_vec());
        table.set_breakpoint_at(&mut target, ADDR + 1, None).unwrap();
        assert_eq!(target.peek(ADDR, 2), vec![0xe9, TRAP]);

        assert_eq!(read(&mut table, &mut target, ADDR, 8), CODE.to_vec());

        table.write_memory(&mut target, ADDR + 1, &[0x77]).unwrap();
        assert_eq!(target.peek(ADDR, 2), vec![0xe9, TRAP]);
        assert_eq!(read(&mut table, &mut target, ADDR, 2), vec![0x55, 0x77]);

        // Removing the breakpoint puts the jump back, not the original code.
        table.free_all_breakpoints(&mut target);
        assert_eq!(target.peek(ADDR, 8), {
            let mut expected = CODE.to_vec();
            expected[1] = 0x77;
            expected
        });
        assert!(table.fast_tracepoint_jump(jump).is_none());
    }

    #[test]
    fn vanished_breakpoint_is_pruned() {
        let (mut table, mut target) = setup();
        let id = table
            .set_gdb_breakpoint(&mut target, PointKind::Software, ADDR, 1)
            .unwrap();
        assert_eq!(
            table.raw_state_at(PointKind::Software, ADDR),
            Some(InsertState::Inserted)
        );

        // A new library gets mapped over the old one.
        target.poke(ADDR, &[0x31]);
        let writes = target.memory_writes();
        table.validate_breakpoints(&mut target);

        assert!(table.breakpoint(id).is_none());
        assert_eq!(table.raw_state_at(PointKind::Software, ADDR), None);
        assert!(table.is_empty());
        // Nothing was restored over the new code.
        assert_eq!(target.memory_writes(), writes);
        assert_eq!(target.peek(ADDR, 1), vec![0x31]);
    }

    #[test]
    fn reads_notice_vanished_breakpoints() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        target.poke(ADDR, &[0x31]);
        assert_eq!(read(&mut table, &mut target, ADDR, 2), vec![0x31, 0x48]);
        assert!(table.is_empty());
    }

    #[test]
    fn read_errors_propagate() {
        let (mut table, mut target) = setup();
        let mut buf = [0; 4];
        assert!(table.read_memory(&mut target, 0xdead_0000, &mut buf).is_err());
    }

    #[test]
    fn expressions_see_original_code() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        let mut memory = ShadowedMemory::new(&mut table, &mut target);
        assert_eq!(memory.read_memory(ADDR, 2), Ok(vec![0x55, 0x48]));
    }
}
