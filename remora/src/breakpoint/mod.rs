/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Breakpoint bookkeeping.
//!
//! Every process owns one [`BreakpointTable`] holding three kinds of object:
//!
//! - [`RawBreakpoint`]s, the physical insertion points. There is at most one
//!   live raw breakpoint per address and kind; it is shared by reference
//!   count.
//! - [`Breakpoint`]s, the requests made by the debugger (`Z` packets) or by
//!   the stub itself. Each one holds one reference to a raw breakpoint.
//! - [`FastTracepointJump`]s, jump instructions patched over code.
//!
//! Software breakpoints and jumps modify inferior code, so all memory
//! accesses made on behalf of the debugger go through the table, which
//! hides the injected bytes (see `shadow.rs`).

mod gdb;
mod jump;
mod shadow;

pub use jump::*;
pub use shadow::*;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::ax::AgentExpr;
use crate::ax::STACK_MAX;
use crate::inferiors::Ptid;
use crate::slot_map::SlotKey;
use crate::slot_map::SlotMap;
use crate::target::PointKind;
use crate::target::Target;
use crate::target::TargetError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakpointError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("no such breakpoint")]
    NotFound,
    #[error("{0:?} points are not supported by the target")]
    Unsupported(PointKind),
}

/// Physical presence of a raw breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertState {
    NotInserted,
    Inserted,
    /// Memory no longer holds our opcode, e.g. the library it was in was
    /// unloaded. Never reinserted; pruned on the next walk.
    Gone,
}

/// A physical insertion point.
#[derive(Debug, Clone)]
pub struct RawBreakpoint {
    pub kind: PointKind,
    pub addr: u64,
    /// Length in bytes. For software breakpoints this is the opcode length.
    pub size: usize,
    /// Breakpoint instruction written for software breakpoints.
    pub opcode: Vec<u8>,
    /// Original memory under a software breakpoint.
    pub shadow: Vec<u8>,
    pub refcount: usize,
    pub state: InsertState,
}

impl RawBreakpoint {
    fn end(&self) -> u64 {
        self.addr + self.size as u64
    }

    fn is_code(&self) -> bool {
        matches!(self.kind, PointKind::Software | PointKind::Hardware)
    }
}

/// Who asked for a breakpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointType {
    /// Requested by the debugger through `Z<kind>`.
    Gdb(PointKind),
    /// Internal single-step breakpoint owned by one thread.
    Reinsert,
    /// Any other internal breakpoint.
    Other,
}

/// A command list entry.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    pub expr: Arc<AgentExpr>,
    /// Keep running the command after the debugger disconnects.
    pub persistent: bool,
}

/// Called when an internal breakpoint is hit, with the stop pc. Returning
/// true deletes the breakpoint.
pub type BreakpointHandler = Box<dyn FnMut(u64) -> bool + Send>;

pub struct Breakpoint {
    pub ty: BreakpointType,
    raw: RawId,
    /// Any true condition makes the breakpoint fire.
    conditions: Vec<Arc<AgentExpr>>,
    commands: Vec<AgentCommand>,
    handler: Option<BreakpointHandler>,
    /// Owning thread of a reinsert breakpoint.
    ptid: Option<Ptid>,
}

impl fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Breakpoint")
            .field("ty", &self.ty)
            .field("raw", &self.raw)
            .field("conditions", &self.conditions.len())
            .field("commands", &self.commands.len())
            .field("handler", &self.handler.is_some())
            .field("ptid", &self.ptid)
            .finish()
    }
}

impl Breakpoint {
    pub fn conditions(&self) -> &[Arc<AgentExpr>] {
        &self.conditions
    }

    pub fn commands(&self) -> &[AgentCommand] {
        &self.commands
    }
}

pub type RawId = SlotKey<RawBreakpoint>;
pub type BreakpointId = SlotKey<Breakpoint>;
pub type JumpId = SlotKey<FastTracepointJump>;

/// Breakpoints, raw breakpoints and jumps of one process.
pub struct BreakpointTable {
    raw: SlotMap<RawBreakpoint>,
    breakpoints: SlotMap<Breakpoint>,
    jumps: SlotMap<FastTracepointJump>,
    /// Stack depth given to conditions and commands.
    stack_limit: usize,
}

impl Default for BreakpointTable {
    fn default() -> Self {
        BreakpointTable {
            raw: SlotMap::new(),
            breakpoints: SlotMap::new(),
            jumps: SlotMap::new(),
            stack_limit: STACK_MAX,
        }
    }
}

impl BreakpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stack_limit(&mut self, limit: usize) {
        self.stack_limit = limit;
    }

    pub fn raw(&self, id: RawId) -> Option<&RawBreakpoint> {
        self.raw.get(id)
    }

    pub fn raw_breakpoints(&self) -> impl Iterator<Item = (RawId, &RawBreakpoint)> {
        self.raw.iter()
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(id)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = (BreakpointId, &Breakpoint)> {
        self.breakpoints.iter()
    }

    /// The raw breakpoint behind `id`.
    pub fn raw_of(&self, id: BreakpointId) -> Option<&RawBreakpoint> {
        self.breakpoints.get(id).and_then(|bp| self.raw.get(bp.raw))
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.breakpoints.is_empty() && self.jumps.is_empty()
    }

    /// Live raw breakpoint of `kind` at `addr`. Software breakpoints match
    /// regardless of size; other kinds must match `size` exactly.
    fn find_raw(&self, kind: PointKind, addr: u64, size: Option<usize>) -> Option<RawId> {
        self.raw
            .iter()
            .find(|(_, raw)| {
                raw.addr == addr
                    && raw.kind == kind
                    && size.map_or(true, |s| s == raw.size)
                    && (kind != PointKind::Software || raw.state != InsertState::Gone)
            })
            .map(|(id, _)| id)
    }

    fn insert_raw(&mut self, target: &mut dyn Target, id: RawId) -> Result<(), TargetError> {
        let (kind, addr, size) = match self.raw.get(id) {
            Some(raw) => (raw.kind, raw.addr, raw.size),
            None => return Ok(()),
        };
        if kind == PointKind::Software {
            // The original contents are read through the shadows of anything
            // else inserted in the same range.
            let mut shadow = vec![0; size];
            self.read_memory(target, addr, &mut shadow)?;
            let opcode = match self.raw.get_mut(id) {
                Some(raw) => {
                    raw.shadow = shadow;
                    raw.opcode.clone()
                }
                None => return Ok(()),
            };
            target.write_memory(addr, &opcode)?;
        } else {
            target.insert_point(kind, addr, size)?;
        }
        if let Some(raw) = self.raw.get_mut(id) {
            raw.state = InsertState::Inserted;
        }
        tracing::debug!("inserted {:?} at {:#x}", kind, addr);
        Ok(())
    }

    // The caller must have marked the raw breakpoint not inserted, so the
    // write below lands in memory instead of in its own shadow.
    fn remove_raw(&mut self, target: &mut dyn Target, id: RawId) -> Result<(), TargetError> {
        let (kind, addr, size, shadow) = match self.raw.get(id) {
            Some(raw) => (raw.kind, raw.addr, raw.size, raw.shadow.clone()),
            None => return Ok(()),
        };
        if kind == PointKind::Software {
            self.write_memory(target, addr, &shadow)?;
        } else {
            target.remove_point(kind, addr, size)?;
        }
        tracing::debug!("removed {:?} at {:#x}", kind, addr);
        Ok(())
    }

    /// Find or create the raw breakpoint of `kind` at `addr` and take a
    /// reference to it, inserting it if it is not in memory yet.
    pub fn set_raw_breakpoint_at(
        &mut self,
        target: &mut dyn Target,
        kind: PointKind,
        addr: u64,
        size: usize,
    ) -> Result<RawId, BreakpointError> {
        if kind != PointKind::Software && !target.supports_point(kind) {
            return Err(BreakpointError::Unsupported(kind));
        }

        let existing = self.find_raw(kind, addr, Some(size));
        if existing.is_none() && kind == PointKind::Software {
            // A breakpoint of another size at this address is either stale,
            // its code replaced under us, or still in memory. A new one
            // then sits on top of it and reads the original bytes through
            // its shadow.
            if let Some(old) = self.find_raw(kind, addr, None) {
                let inserted = self.raw.get(old).map(|raw| raw.state) == Some(InsertState::Inserted);
                if inserted && !self.validate_inserted(target, old) {
                    tracing::debug!("breakpoint at {:#x} changed size to {}", addr, size);
                }
            }
        }

        let (id, created) = match existing {
            Some(id) => (id, false),
            None => {
                let opcode = if kind == PointKind::Software {
                    target.sw_breakpoint_from_kind(size)
                } else {
                    Vec::new()
                };
                let id = self.raw.insert(RawBreakpoint {
                    kind,
                    addr,
                    size,
                    opcode,
                    shadow: Vec::new(),
                    refcount: 0,
                    state: InsertState::NotInserted,
                });
                (id, true)
            }
        };

        if self.raw.get(id).map(|r| r.state) == Some(InsertState::NotInserted) {
            if let Err(err) = self.insert_raw(target, id) {
                tracing::warn!("failed to insert {:?} at {:#x}: {}", kind, addr, err);
                if created {
                    self.raw.remove(id);
                }
                return Err(err.into());
            }
        }

        if let Some(raw) = self.raw.get_mut(id) {
            raw.refcount += 1;
        }
        Ok(id)
    }

    /// Drop one reference to a raw breakpoint, removing it from memory and
    /// from the table when it was the last one. A raw breakpoint that fails
    /// to come out stays in the table, inserted, so removal can be retried.
    fn release_raw(&mut self, target: &mut dyn Target, id: RawId) -> Result<(), BreakpointError> {
        let raw = self.raw.get_mut(id).ok_or(BreakpointError::NotFound)?;
        raw.refcount = raw.refcount.saturating_sub(1);
        if raw.refcount > 0 {
            return Ok(());
        }
        self.delete_raw(target, id)
    }

    fn delete_raw(&mut self, target: &mut dyn Target, id: RawId) -> Result<(), BreakpointError> {
        let raw = self.raw.get_mut(id).ok_or(BreakpointError::NotFound)?;
        if raw.state == InsertState::Inserted {
            raw.state = InsertState::NotInserted;
            if let Err(err) = self.remove_raw(target, id) {
                if let Some(raw) = self.raw.get_mut(id) {
                    tracing::warn!("failed to remove {:?} at {:#x}: {}", raw.kind, raw.addr, err);
                    raw.state = InsertState::Inserted;
                }
                return Err(err.into());
            }
        }
        self.raw.remove(id);
        Ok(())
    }

    /// Create a breakpoint backed by a raw breakpoint of `kind` at `addr`.
    pub fn set_breakpoint(
        &mut self,
        target: &mut dyn Target,
        ty: BreakpointType,
        kind: PointKind,
        addr: u64,
        size: usize,
        handler: Option<BreakpointHandler>,
    ) -> Result<BreakpointId, BreakpointError> {
        let raw = self.set_raw_breakpoint_at(target, kind, addr, size)?;
        let id = self.breakpoints.insert(Breakpoint {
            ty,
            raw,
            conditions: Vec::new(),
            commands: Vec::new(),
            handler,
            ptid: None,
        });
        tracing::debug!("set {:?} breakpoint at {:#x}", ty, addr);
        Ok(id)
    }

    /// Internal software breakpoint at `addr`, with an optional handler run
    /// by [`Self::check_breakpoints`].
    pub fn set_breakpoint_at(
        &mut self,
        target: &mut dyn Target,
        addr: u64,
        handler: Option<BreakpointHandler>,
    ) -> Result<BreakpointId, BreakpointError> {
        let size = target.breakpoint_kind_from_pc(addr);
        self.set_breakpoint(
            target,
            BreakpointType::Other,
            PointKind::Software,
            addr,
            size,
            handler,
        )
    }

    /// Delete a breakpoint. The breakpoint itself is always freed; an error
    /// means its raw breakpoint could not be taken out of memory.
    pub fn delete_breakpoint(
        &mut self,
        target: &mut dyn Target,
        id: BreakpointId,
    ) -> Result<(), BreakpointError> {
        let bp = self.breakpoints.remove(id).ok_or(BreakpointError::NotFound)?;
        tracing::debug!("delete {:?} breakpoint", bp.ty);
        self.release_raw(target, bp.raw)
    }

    /// Single-step breakpoint for `ptid` at `addr`.
    pub fn set_reinsert_breakpoint(
        &mut self,
        target: &mut dyn Target,
        addr: u64,
        ptid: Ptid,
    ) -> Result<BreakpointId, BreakpointError> {
        let size = target.breakpoint_kind_from_pc(addr);
        let id = self.set_breakpoint(
            target,
            BreakpointType::Reinsert,
            PointKind::Software,
            addr,
            size,
            None,
        )?;
        if let Some(bp) = self.breakpoints.get_mut(id) {
            bp.ptid = Some(ptid);
        }
        Ok(id)
    }

    fn reinsert_breakpoints_of(&self, ptid: Ptid) -> Vec<BreakpointId> {
        self.breakpoints
            .iter()
            .filter(|(_, bp)| bp.ty == BreakpointType::Reinsert && bp.ptid == Some(ptid))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn has_reinsert_breakpoints(&self, ptid: Ptid) -> bool {
        !self.reinsert_breakpoints_of(ptid).is_empty()
    }

    pub fn delete_reinsert_breakpoints(
        &mut self,
        target: &mut dyn Target,
        ptid: Ptid,
    ) -> Result<(), BreakpointError> {
        let mut result = Ok(());
        for id in self.reinsert_breakpoints_of(ptid) {
            if let Err(err) = self.delete_breakpoint(target, id) {
                result = Err(err);
            }
        }
        result
    }

    /// Run the handlers of internal breakpoints at `stop_pc`, deleting
    /// those whose handler asks for it.
    pub fn check_breakpoints(&mut self, target: &mut dyn Target, stop_pc: u64) {
        for id in self.breakpoints.keys() {
            let raw = match self.raw_of(id) {
                Some(raw) if raw.addr == stop_pc => raw,
                _ => continue,
            };
            if raw.state != InsertState::Inserted {
                tracing::warn!("hit a removed breakpoint at {:#x}?", stop_pc);
                return;
            }
            let done = match self.breakpoints.get_mut(id).and_then(|bp| bp.handler.as_mut()) {
                Some(handler) => handler(stop_pc),
                None => false,
            };
            if done {
                if let Err(err) = self.delete_breakpoint(target, id) {
                    tracing::warn!("failed to delete breakpoint at {:#x}: {}", stop_pc, err);
                }
            }
        }
    }

    /// Whether any code breakpoint is recorded at `addr`.
    pub fn breakpoint_here(&self, addr: u64) -> bool {
        self.raw
            .iter()
            .any(|(_, raw)| raw.is_code() && raw.addr == addr)
    }

    /// Whether a code breakpoint is physically present at `addr`.
    pub fn breakpoint_inserted_here(&self, addr: u64) -> bool {
        self.raw.iter().any(|(_, raw)| {
            raw.is_code() && raw.addr == addr && raw.state == InsertState::Inserted
        })
    }

    pub fn raw_state_at(&self, kind: PointKind, addr: u64) -> Option<InsertState> {
        self.raw
            .iter()
            .find(|(_, raw)| raw.kind == kind && raw.addr == addr)
            .map(|(_, raw)| raw.state)
    }

    fn uninsert_raw(&mut self, target: &mut dyn Target, id: RawId) {
        let raw = match self.raw.get_mut(id) {
            Some(raw) => raw,
            None => return,
        };
        match raw.state {
            InsertState::Gone => {
                tracing::debug!("breakpoint at {:#x} is marked gone", raw.addr);
            }
            InsertState::NotInserted => {}
            InsertState::Inserted => {
                raw.state = InsertState::NotInserted;
                if let Err(err) = self.remove_raw(target, id) {
                    if let Some(raw) = self.raw.get_mut(id) {
                        tracing::debug!("failed to uninsert breakpoint at {:#x}: {}", raw.addr, err);
                        raw.state = InsertState::Inserted;
                    }
                }
            }
        }
    }

    fn reinsert_raw(&mut self, target: &mut dyn Target, id: RawId) {
        if self.raw.get(id).map(|r| r.state) != Some(InsertState::NotInserted) {
            return;
        }
        if let Err(err) = self.insert_raw(target, id) {
            tracing::debug!("failed to reinsert breakpoint: {}", err);
        }
    }

    fn code_raw_at(&self, pc: Option<u64>) -> Vec<RawId> {
        self.raw
            .iter()
            .filter(|(_, raw)| raw.is_code() && pc.map_or(true, |pc| raw.addr == pc))
            .map(|(id, _)| id)
            .collect()
    }

    /// Temporarily take the code breakpoints at `pc` out of memory, e.g. to
    /// step over them.
    pub fn uninsert_breakpoints_at(&mut self, target: &mut dyn Target, pc: u64) {
        let ids = self.code_raw_at(Some(pc));
        if ids.is_empty() {
            tracing::debug!("could not find breakpoint at {:#x} (uninserting)", pc);
        }
        for id in ids {
            self.uninsert_raw(target, id);
        }
    }

    pub fn reinsert_breakpoints_at(&mut self, target: &mut dyn Target, pc: u64) {
        let ids = self.code_raw_at(Some(pc));
        if ids.is_empty() {
            tracing::debug!("could not find breakpoint at {:#x} (reinserting)", pc);
        }
        for id in ids {
            self.reinsert_raw(target, id);
        }
    }

    pub fn uninsert_all_breakpoints(&mut self, target: &mut dyn Target) {
        for id in self.code_raw_at(None) {
            self.uninsert_raw(target, id);
        }
    }

    pub fn reinsert_all_breakpoints(&mut self, target: &mut dyn Target) {
        for id in self.code_raw_at(None) {
            self.reinsert_raw(target, id);
        }
    }

    /// Forget that anything is in memory, e.g. after an exec replaced the
    /// address space.
    pub fn mark_breakpoints_out(&mut self) {
        for (_, raw) in self.raw.iter_mut() {
            if raw.state == InsertState::Inserted {
                raw.state = InsertState::NotInserted;
            }
        }
        for (_, jump) in self.jumps.iter_mut() {
            jump.inserted = false;
        }
    }

    /// Delete everything, removing whatever is still in memory. Used when a
    /// process exits or is detached.
    pub fn free_all_breakpoints(&mut self, target: &mut dyn Target) {
        for id in self.breakpoints.keys() {
            if let Err(err) = self.delete_breakpoint(target, id) {
                tracing::debug!("freeing breakpoint: {}", err);
            }
        }
        for id in self.raw.keys() {
            if let Err(err) = self.delete_raw(target, id) {
                tracing::debug!("freeing raw breakpoint: {}", err);
            }
        }
        for id in self.jumps.keys() {
            if let Err(err) = self.remove_jump(target, id) {
                tracing::debug!("freeing fast tracepoint jump: {}", err);
            }
        }
        self.raw.drain();
        self.jumps.drain();
    }

    /// Copy of the table for a forked child, whose memory carries the same
    /// patches as ours. Handlers stay with the parent.
    pub fn clone_for_fork(&self) -> BreakpointTable {
        let mut breakpoints = SlotMap::new();
        for (_, bp) in self.breakpoints.iter() {
            breakpoints.insert(Breakpoint {
                ty: bp.ty,
                raw: bp.raw,
                conditions: bp.conditions.clone(),
                commands: bp.commands.clone(),
                handler: None,
                ptid: bp.ptid,
            });
        }
        BreakpointTable {
            raw: self.raw.clone(),
            breakpoints,
            jumps: self.jumps.clone(),
            stack_limit: self.stack_limit,
        }
    }

    /// Restore the original code in a forked child that will not be
    /// debugged. The target must already be directed at the child; the
    /// table itself is left alone.
    pub fn detach_breakpoints(&self, target: &mut dyn Target) {
        for (_, jump) in self.jumps.iter().filter(|(_, jump)| jump.inserted) {
            if let Err(err) = target.write_memory(jump.addr, &jump.shadow) {
                tracing::warn!("failed to detach fast tracepoint jump at {:#x}: {}", jump.addr, err);
            }
        }
        for (_, raw) in self.raw.iter() {
            if raw.kind == PointKind::Software && raw.state == InsertState::Inserted {
                if let Err(err) = target.write_memory(raw.addr, &raw.shadow) {
                    tracing::warn!("failed to detach breakpoint at {:#x}: {}", raw.addr, err);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::FakeTarget;
    use crate::testing::TRAP;

    const ADDR: u64 = 0x1000;

    fn setup() -> (BreakpointTable, FakeTarget) {
        let mut target = FakeTarget::new();
        target.poke(ADDR, &[0x55, 0x48, 0x89, 0xe5]);
        (BreakpointTable::new(), target)
    }

    #[test]
    fn refcounted_raw_breakpoint() {
        let (mut table, mut target) = setup();
        let ty = BreakpointType::Other;
        let ids: Vec<_> = (0..3)
            .map(|_| {
                table
                    .set_breakpoint(&mut target, ty, PointKind::Software, ADDR, 1, None)
                    .unwrap()
            })
            .collect();
        assert_eq!(table.raw_breakpoints().count(), 1);
        assert_eq!(target.peek(ADDR, 1), vec![TRAP]);
        assert_eq!(target.memory_writes(), 1);

        for id in &ids[..2] {
            table.delete_breakpoint(&mut target, *id).unwrap();
            assert_eq!(target.peek(ADDR, 1), vec![TRAP]);
        }
        table.delete_breakpoint(&mut target, ids[2]).unwrap();
        assert_eq!(target.peek(ADDR, 1), vec![0x55]);
        assert_eq!(target.memory_writes(), 2);
        assert!(table.is_empty());
        assert_eq!(
            table.delete_breakpoint(&mut target, ids[2]),
            Err(BreakpointError::NotFound)
        );
    }

    #[test]
    fn failed_insertion_leaves_nothing_behind() {
        let (mut table, mut target) = setup();
        target.fail_writes(true);
        let err = table
            .set_breakpoint_at(&mut target, ADDR, None)
            .unwrap_err();
        assert!(matches!(err, BreakpointError::Target(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn failed_removal_stays_inserted() {
        let (mut table, mut target) = setup();
        let id = table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        target.fail_writes(true);
        assert!(table.delete_breakpoint(&mut target, id).is_err());
        assert!(table.breakpoint(id).is_none());
        assert_eq!(
            table.raw_state_at(PointKind::Software, ADDR),
            Some(InsertState::Inserted)
        );

        // A retry through a fresh reference takes it out for good.
        target.fail_writes(false);
        let id = table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        assert_eq!(table.raw_breakpoints().count(), 1);
        table.delete_breakpoint(&mut target, id).unwrap();
        assert_eq!(target.peek(ADDR, 1), vec![0x55]);
        assert!(table.is_empty());
    }

    #[test]
    fn hardware_points_need_target_support() {
        let (mut table, mut target) = setup();
        assert_eq!(
            table
                .set_raw_breakpoint_at(&mut target, PointKind::Hardware, ADDR, 1)
                .unwrap_err(),
            BreakpointError::Unsupported(PointKind::Hardware)
        );
        target.support_hardware_points(true);
        let raw = table
            .set_raw_breakpoint_at(&mut target, PointKind::WriteWatch, ADDR, 4)
            .unwrap();
        let again = table
            .set_raw_breakpoint_at(&mut target, PointKind::WriteWatch, ADDR, 4)
            .unwrap();
        assert_eq!(raw, again);
        assert_eq!(target.inserted_points(), 1);
        assert_eq!(table.raw(raw).unwrap().refcount, 2);
        // Watchpoints of a different length are distinct.
        let other = table
            .set_raw_breakpoint_at(&mut target, PointKind::WriteWatch, ADDR, 8)
            .unwrap();
        assert_ne!(raw, other);
    }

    #[test]
    fn resized_software_breakpoint_sits_on_the_old_one() {
        let (mut table, mut target) = setup();
        let first = table
            .set_raw_breakpoint_at(&mut target, PointKind::Software, ADDR, 1)
            .unwrap();
        let second = table
            .set_raw_breakpoint_at(&mut target, PointKind::Software, ADDR, 2)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(table.raw(first).unwrap().state, InsertState::Inserted);
        assert_eq!(table.raw(second).unwrap().shadow, vec![0x55, 0x48]);
        assert_eq!(target.peek(ADDR, 2), vec![TRAP, TRAP]);

        let mut buf = [0; 2];
        table.read_memory(&mut target, ADDR, &mut buf).unwrap();
        assert_eq!(buf, [0x55, 0x48]);

        table.release_raw(&mut target, first).unwrap();
        assert_eq!(target.peek(ADDR, 2), vec![TRAP, TRAP]);
        table.release_raw(&mut target, second).unwrap();
        assert_eq!(target.peek(ADDR, 4), vec![0x55, 0x48, 0x89, 0xe5]);
        assert!(table.is_empty());
    }

    #[test]
    fn resized_software_breakpoint_replaces_a_stale_one() {
        let (mut table, mut target) = setup();
        let first = table
            .set_raw_breakpoint_at(&mut target, PointKind::Software, ADDR, 1)
            .unwrap();
        target.poke(ADDR, &[0x31, 0xc0]);
        let second = table
            .set_raw_breakpoint_at(&mut target, PointKind::Software, ADDR, 2)
            .unwrap();
        assert_eq!(table.raw(first).unwrap().state, InsertState::Gone);
        assert_eq!(table.raw(second).unwrap().shadow, vec![0x31, 0xc0]);
    }

    #[test]
    fn uninsert_and_reinsert_are_idempotent() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();

        table.uninsert_all_breakpoints(&mut target);
        table.uninsert_all_breakpoints(&mut target);
        assert_eq!(target.peek(ADDR, 1), vec![0x55]);
        assert!(table.breakpoint_here(ADDR));
        assert!(!table.breakpoint_inserted_here(ADDR));

        table.reinsert_breakpoints_at(&mut target, ADDR);
        table.reinsert_breakpoints_at(&mut target, ADDR);
        assert_eq!(target.peek(ADDR, 1), vec![TRAP]);
        assert!(table.breakpoint_inserted_here(ADDR));
        assert_eq!(target.memory_writes(), 3);
    }

    #[test]
    fn reinsert_breakpoints_belong_to_a_thread() {
        let (mut table, mut target) = setup();
        let a = Ptid::new(100, 101);
        let b = Ptid::new(100, 102);
        table.set_reinsert_breakpoint(&mut target, ADDR, a).unwrap();
        table.set_reinsert_breakpoint(&mut target, ADDR + 2, a).unwrap();
        assert!(table.has_reinsert_breakpoints(a));
        assert!(!table.has_reinsert_breakpoints(b));
        table.delete_reinsert_breakpoints(&mut target, a).unwrap();
        assert!(!table.has_reinsert_breakpoints(a));
        assert!(table.is_empty());
        assert_eq!(target.peek(ADDR, 4), vec![0x55, 0x48, 0x89, 0xe5]);
    }

    #[test]
    fn check_breakpoints_runs_handlers() {
        let (mut table, mut target) = setup();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = hits.clone();
        table
            .set_breakpoint_at(
                &mut target,
                ADDR,
                Some(Box::new(move |_pc| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 1
                })),
            )
            .unwrap();

        table.check_breakpoints(&mut target, ADDR + 1);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
        table.check_breakpoints(&mut target, ADDR);
        assert!(!table.is_empty());
        table.check_breakpoints(&mut target, ADDR);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(table.is_empty());
    }

    #[test]
    fn free_all_restores_memory() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        table.set_breakpoint_at(&mut target, ADDR + 1, None).unwrap();
        table
            .set_fast_tracepoint_jump(&mut target, ADDR + 2, &[0xe9, 0x00])
            .unwrap();
        table.free_all_breakpoints(&mut target);
        assert!(table.is_empty());
        assert_eq!(target.peek(ADDR, 4), vec![0x55, 0x48, 0x89, 0xe5]);
    }

    #[test]
    fn mark_breakpoints_out_after_exec() {
        let (mut table, mut target) = setup();
        table.set_breakpoint_at(&mut target, ADDR, None).unwrap();
        table.mark_breakpoints_out();
        assert!(!table.breakpoint_inserted_here(ADDR));
        // Memory is not touched: the new image is already in place.
        assert_eq!(target.peek(ADDR, 1), vec![TRAP]);
    }

    #[test]
    fn forked_child_tables() {
        let (mut table, mut target) = setup();
        table
            .set_gdb_breakpoint(&mut target, PointKind::Software, ADDR, 1)
            .unwrap();
        table
            .set_breakpoint_at(&mut target, ADDR + 1, Some(Box::new(|_| true)))
            .unwrap();

        let child = table.clone_for_fork();
        assert!(child.gdb_breakpoint_here(ADDR));
        assert!(child.breakpoint_inserted_here(ADDR + 1));
        assert!(child.breakpoints().all(|(_, bp)| bp.handler.is_none()));

        table.detach_breakpoints(&mut target);
        assert_eq!(target.peek(ADDR, 2), vec![0x55, 0x48]);
        // Only memory changed.
        assert!(table.breakpoint_inserted_here(ADDR));
    }
}
