/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The contract an OS/architecture back-end implements for the stub.

use nix::errno::Errno;
use nix::unistd::Pid;
use std::sync::Arc;
use thiserror::Error;

use crate::commands::ResumeAction;
use crate::commands::ThreadId;
use crate::inferiors::Ptid;
use crate::regcache::RegCache;
use crate::tdesc::TargetDescription;

/// Back-end failure.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TargetError {
    #[error("{0}")]
    Errno(Errno),
    #[error("operation not supported by the target")]
    Unsupported,
    #[error("process {0} died")]
    Died(Pid),
}

impl From<Errno> for TargetError {
    fn from(errno: Errno) -> Self {
        TargetError::Errno(errno)
    }
}

/// Kind of a physical insertion point, numbered as in `Z<type>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    /// Software breakpoint
    Software,
    /// Hardware breakpoint
    Hardware,
    /// Write watchpoint
    WriteWatch,
    /// Read watchpoint
    ReadWatch,
    /// Access (read or write) watchpoint
    AccessWatch,
}

impl PointKind {
    pub fn new(ty: u8) -> Option<Self> {
        match ty {
            0 => Some(PointKind::Software),
            1 => Some(PointKind::Hardware),
            2 => Some(PointKind::WriteWatch),
            3 => Some(PointKind::ReadWatch),
            4 => Some(PointKind::AccessWatch),
            _ => None,
        }
    }

    pub fn z_type(self) -> u8 {
        match self {
            PointKind::Software => 0,
            PointKind::Hardware => 1,
            PointKind::WriteWatch => 2,
            PointKind::ReadWatch => 3,
            PointKind::AccessWatch => 4,
        }
    }

    pub fn is_watchpoint(self) -> bool {
        matches!(
            self,
            PointKind::WriteWatch | PointKind::ReadWatch | PointKind::AccessWatch
        )
    }

    /// Stop reply tag reported when a watchpoint of this kind triggers.
    pub fn watch_tag(self) -> Option<&'static str> {
        match self {
            PointKind::WriteWatch => Some("watch"),
            PointKind::ReadWatch => Some("rwatch"),
            PointKind::AccessWatch => Some("awatch"),
            _ => None,
        }
    }
}

/// One action of a resume request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeRequest {
    pub thread: ThreadId,
    pub action: ResumeAction,
}

/// The OS/architecture specific half of the stub.
///
/// Every method runs synchronously while a packet is being handled; stop
/// events are delivered separately through the channel passed to the
/// session.
pub trait Target: Send {
    /// Direct the memory and breakpoint accesses that follow at process
    /// `pid`.
    fn select_process(&mut self, _pid: Pid) {}

    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TargetError>;

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TargetError>;

    /// Breakpoint kind (instruction length) to use for a breakpoint at `pc`.
    fn breakpoint_kind_from_pc(&self, _pc: u64) -> usize {
        1
    }

    /// Software breakpoint instruction for the given kind.
    fn sw_breakpoint_from_kind(&self, kind: usize) -> Vec<u8>;

    /// Whether `insert_point` can handle `kind`. Software breakpoints are
    /// always handled by the stub itself.
    fn supports_point(&self, kind: PointKind) -> bool {
        kind == PointKind::Software
    }

    /// Insert a hardware breakpoint or watchpoint.
    fn insert_point(&mut self, _kind: PointKind, _addr: u64, _len: usize) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    fn remove_point(&mut self, _kind: PointKind, _addr: u64, _len: usize) -> Result<(), TargetError> {
        Err(TargetError::Unsupported)
    }

    /// Register layout of process `pid`.
    fn target_description(&self, pid: Pid) -> Arc<TargetDescription>;

    /// Fill `regcache` with the registers of `ptid`, supplying `None` for
    /// registers the back-end cannot read.
    fn fetch_registers(&mut self, ptid: Ptid, regcache: &mut RegCache) -> Result<(), TargetError>;

    fn store_registers(&mut self, ptid: Ptid, regcache: &RegCache) -> Result<(), TargetError>;

    fn stopped_by_watchpoint(&self, _ptid: Ptid) -> bool {
        false
    }

    fn stopped_data_address(&self, _ptid: Ptid) -> Option<u64> {
        None
    }

    fn resume(&mut self, requests: &[ResumeRequest]) -> Result<(), TargetError>;

    /// Asynchronously stop the inferior; the stop arrives as a stop event.
    fn interrupt(&mut self) -> Result<(), TargetError>;

    fn thread_alive(&self, ptid: Ptid) -> bool;

    fn kill(&mut self, pid: Pid) -> Result<(), TargetError>;

    fn detach(&mut self, pid: Pid) -> Result<(), TargetError>;

    /// Stop branch tracing of a thread that is going away.
    fn disable_btrace(&mut self, _ptid: Ptid) -> Result<(), TargetError> {
        Ok(())
    }

    /// Symbols whose addresses the back-end wants from the debugger.
    fn symbols_to_look_up(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn point_kinds() {
        for ty in 0..5 {
            assert_eq!(PointKind::new(ty).map(|k| k.z_type()), Some(ty));
        }
        assert_eq!(PointKind::new(5), None);
        assert!(PointKind::ReadWatch.is_watchpoint());
        assert!(!PointKind::Hardware.is_watchpoint());
        assert_eq!(PointKind::AccessWatch.watch_tag(), Some("awatch"));
    }
}
