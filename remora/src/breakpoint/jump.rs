/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Fast tracepoint jumps.
//!
//! A fast tracepoint replaces the instruction at the tracepoint address
//! with a jump into a collection pad. The pad itself is built by the
//! architecture back-end; here we only track the patched bytes. Jumps are
//! written through the shadow layer, so a software breakpoint sharing the
//! range stays on top of the jump.

use super::*;

#[derive(Debug, Clone)]
pub struct FastTracepointJump {
    pub addr: u64,
    /// The jump instruction.
    pub insn: Vec<u8>,
    /// Original memory under the jump.
    pub shadow: Vec<u8>,
    pub refcount: usize,
    pub inserted: bool,
}

impl FastTracepointJump {
    pub fn len(&self) -> usize {
        self.insn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insn.is_empty()
    }
}

impl BreakpointTable {
    pub fn fast_tracepoint_jump(&self, id: JumpId) -> Option<&FastTracepointJump> {
        self.jumps.get(id)
    }

    pub fn find_fast_tracepoint_jump_at(&self, addr: u64) -> Option<JumpId> {
        self.jumps
            .iter()
            .find(|(_, jump)| jump.addr == addr)
            .map(|(id, _)| id)
    }

    /// Patch `insn` in at `addr`, or take another reference to the jump
    /// already there.
    pub fn set_fast_tracepoint_jump(
        &mut self,
        target: &mut dyn Target,
        addr: u64,
        insn: &[u8],
    ) -> Result<JumpId, BreakpointError> {
        if let Some(id) = self.find_fast_tracepoint_jump_at(addr) {
            if let Some(jump) = self.jumps.get_mut(id) {
                jump.refcount += 1;
            }
            return Ok(id);
        }

        // Breakpoints may already sit in this range; read the code under
        // them.
        let mut shadow = vec![0; insn.len()];
        self.read_memory(target, addr, &mut shadow)?;

        let id = self.jumps.insert(FastTracepointJump {
            addr,
            insn: insn.to_vec(),
            shadow: shadow.clone(),
            refcount: 1,
            inserted: true,
        });

        // Writing the original bytes back through the shadow layer puts the
        // jump into memory underneath any breakpoint.
        if let Err(err) = self.write_memory(target, addr, &shadow) {
            tracing::warn!("failed to insert fast tracepoint jump at {:#x}: {}", addr, err);
            self.jumps.remove(id);
            return Err(err.into());
        }
        tracing::debug!("inserted fast tracepoint jump at {:#x}", addr);
        Ok(id)
    }

    /// Drop a reference to a jump, restoring the original code when it was
    /// the last one. A jump that cannot be removed stays in the table.
    pub fn delete_fast_tracepoint_jump(
        &mut self,
        target: &mut dyn Target,
        id: JumpId,
    ) -> Result<(), BreakpointError> {
        let jump = self.jumps.get_mut(id).ok_or_else(|| {
            tracing::warn!("could not find fast tracepoint jump");
            BreakpointError::NotFound
        })?;
        jump.refcount = jump.refcount.saturating_sub(1);
        if jump.refcount > 0 {
            return Ok(());
        }
        self.remove_jump(target, id)
    }

    pub(super) fn remove_jump(
        &mut self,
        target: &mut dyn Target,
        id: JumpId,
    ) -> Result<(), BreakpointError> {
        let jump = self.jumps.get_mut(id).ok_or(BreakpointError::NotFound)?;
        if jump.inserted {
            jump.inserted = false;
            let (addr, shadow) = (jump.addr, jump.shadow.clone());
            if let Err(err) = self.write_memory(target, addr, &shadow) {
                tracing::warn!("failed to remove fast tracepoint jump at {:#x}: {}", addr, err);
                if let Some(jump) = self.jumps.get_mut(id) {
                    jump.inserted = true;
                }
                return Err(err.into());
            }
        }
        self.jumps.remove(id);
        Ok(())
    }

    /// Put the original code back at `addr` without forgetting the jump,
    /// e.g. to step over the instruction it replaced.
    pub fn uninsert_fast_tracepoint_jumps_at(&mut self, target: &mut dyn Target, addr: u64) {
        let id = match self.find_fast_tracepoint_jump_at(addr) {
            Some(id) => id,
            None => {
                tracing::debug!("could not find fast tracepoint jump at {:#x} (uninserting)", addr);
                return;
            }
        };
        let shadow = match self.jumps.get_mut(id) {
            Some(jump) if jump.inserted => {
                jump.inserted = false;
                jump.shadow.clone()
            }
            _ => return,
        };
        if let Err(err) = self.write_memory(target, addr, &shadow) {
            tracing::debug!("failed to uninsert fast tracepoint jump at {:#x}: {}", addr, err);
            if let Some(jump) = self.jumps.get_mut(id) {
                jump.inserted = true;
            }
        }
    }

    pub fn reinsert_fast_tracepoint_jumps_at(&mut self, target: &mut dyn Target, addr: u64) {
        let id = match self.find_fast_tracepoint_jump_at(addr) {
            Some(id) => id,
            None => {
                tracing::debug!("could not find fast tracepoint jump at {:#x} (reinserting)", addr);
                return;
            }
        };
        let shadow = match self.jumps.get_mut(id) {
            Some(jump) if !jump.inserted => {
                jump.inserted = true;
                jump.shadow.clone()
            }
            _ => return,
        };
        if let Err(err) = self.write_memory(target, addr, &shadow) {
            tracing::debug!("failed to reinsert fast tracepoint jump at {:#x}: {}", addr, err);
            if let Some(jump) = self.jumps.get_mut(id) {
                jump.inserted = false;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FakeTarget;
    use crate::testing::TRAP;

    const ADDR: u64 = 0x3000;
    const CODE: [u8; 6] = [0x48, 0x8b, 0x45, 0xf8, 0x48, 0x01];
    const JMP: [u8; 5] = [0xe9, 0xfb, 0x0f, 0x00, 0x00];

    fn setup() -> (BreakpointTable, FakeTarget) {
        let mut target = FakeTarget::new();
        target.poke(ADDR, &CODE);
        (BreakpointTable::new(), target)
    }

    #[test]
    fn jumps_are_refcounted() {
        let (mut table, mut target) = setup();
        let a = table.set_fast_tracepoint_jump(&mut target, ADDR, &JMP).unwrap();
        let b = table.set_fast_tracepoint_jump(&mut target, ADDR, &JMP).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.fast_tracepoint_jump(a).unwrap().refcount, 2);
        assert_eq!(target.peek(ADDR, 5), JMP.to_vec());

        let mut buf = [0; 6];
        table.read_memory(&mut target, ADDR, &mut buf).unwrap();
        assert_eq!(buf, CODE);

        table.delete_fast_tracepoint_jump(&mut target, a).unwrap();
        assert_eq!(target.peek(ADDR, 5), JMP.to_vec());
        table.delete_fast_tracepoint_jump(&mut target, a).unwrap();
        assert_eq!(target.peek(ADDR, 6), CODE.to_vec());
        assert!(table.is_empty());
        assert_eq!(
            table.delete_fast_tracepoint_jump(&mut target, a),
            Err(BreakpointError::NotFound)
        );
    }

    #[test]
    fn jump_under_existing_breakpoint() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR + 2, None).unwrap();
        let jump = table.set_fast_tracepoint_jump(&mut target, ADDR, &JMP).unwrap();
        assert_eq!(
            target.peek(ADDR, 5),
            vec![0xe9, 0xfb, TRAP, 0x00, 0x00]
        );
        // The jump saved the code, not the trap.
        assert_eq!(table.fast_tracepoint_jump(jump).unwrap().shadow, CODE[..5].to_vec());

        table.uninsert_fast_tracepoint_jumps_at(&mut target, ADDR);
        assert_eq!(target.peek(ADDR, 5), vec![0x48, 0x8b, TRAP, 0xf8, 0x48]);
        table.reinsert_fast_tracepoint_jumps_at(&mut target, ADDR);
        table.reinsert_fast_tracepoint_jumps_at(&mut target, ADDR);
        assert_eq!(
            target.peek(ADDR, 5),
            vec![0xe9, 0xfb, TRAP, 0x00, 0x00]
        );
    }

    #[test]
    fn failed_jump_insertion() {
        let (mut table, mut target) = setup();
        target.fail_writes(true);
        assert!(table.set_fast_tracepoint_jump(&mut target, ADDR, &JMP).is_err());
        assert!(table.find_fast_tracepoint_jump_at(ADDR).is_none());
        // Unreadable memory fails before anything is written.
        target.fail_writes(false);
        assert!(table.set_fast_tracepoint_jump(&mut target, 0x10, &JMP).is_err());
        assert!(table.is_empty());
    }
}
