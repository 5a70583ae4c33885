/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Processes and threads known to the stub.

use bytes::Bytes;
use nix::unistd::Pid;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::breakpoint::BreakpointTable;
use crate::commands::ResumeAction;
use crate::commands::ThreadId;
use crate::regcache::RegCache;
use crate::target::Target;
use crate::target::TargetError;
use crate::tdesc::TargetDescription;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InferiorError {
    #[error("thread id must name both a process and a thread")]
    ThreadIdNotSpecified,
    #[error("unknown process {0}")]
    UnknownProcess(Pid),
    #[error("unknown thread {0}")]
    UnknownThread(Ptid),
    #[error("process {0} still has threads")]
    ThreadsRemain(Pid),
    #[error(transparent)]
    Target(#[from] TargetError),
}

/// Process and thread id pair uniquely identifying a thread.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Ptid {
    pub pid: Pid,
    pub tid: Pid,
}

impl Ptid {
    pub fn new(pid: i32, tid: i32) -> Self {
        Ptid {
            pid: Pid::from_raw(pid),
            tid: Pid::from_raw(tid),
        }
    }

    pub fn matches(&self, threadid: &ThreadId) -> bool {
        ThreadId::from(*self).matches(threadid)
    }
}

impl fmt::Display for Ptid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.pid, self.tid)
    }
}

impl From<Ptid> for ThreadId {
    fn from(id: Ptid) -> Self {
        ThreadId::pid_tid(id.pid.as_raw(), id.tid.as_raw())
    }
}

impl TryFrom<ThreadId> for Ptid {
    type Error = InferiorError;

    fn try_from(threadid: ThreadId) -> Result<Self, Self::Error> {
        let pid = threadid.getpid().ok_or(InferiorError::ThreadIdNotSpecified)?;
        let tid = threadid.gettid().ok_or(InferiorError::ThreadIdNotSpecified)?;
        Ok(Ptid { pid, tid })
    }
}

/// A debugged process.
pub struct Process {
    pub pid: Pid,
    /// Attached to rather than spawned by us.
    pub attached: bool,
    pub breakpoints: BreakpointTable,
    tdesc: Arc<TargetDescription>,
    symbols: HashMap<String, u64>,
}

impl Process {
    pub fn tdesc(&self) -> &Arc<TargetDescription> {
        &self.tdesc
    }

    pub fn symbol(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).copied()
    }

    pub fn cache_symbol(&mut self, name: &str, addr: u64) {
        self.symbols.insert(name.to_owned(), addr);
    }
}

/// A debugged thread.
pub struct Thread {
    pub ptid: Ptid,
    /// Running, as far as the debugger is concerned.
    pub resumed: bool,
    /// How the thread was last resumed, reused to let it continue after a
    /// stop the debugger is not told about.
    pub last_action: Option<ResumeAction>,
    /// Signal of the last reported stop, in gdb numbering.
    pub last_signal: u8,
    regcache: Option<RegCache>,
}

impl Thread {
    pub fn regcache(&self) -> Option<&RegCache> {
        self.regcache.as_ref()
    }
}

/// A stop reply waiting to be acknowledged in non-stop mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStop {
    pub ptid: Ptid,
    /// Encoded stop reply payload.
    pub reply: Bytes,
}

/// Every process and thread, in creation order, plus the current thread
/// selection.
#[derive(Default)]
pub struct Inferiors {
    processes: Vec<Process>,
    threads: Vec<Thread>,
    current: Option<Ptid>,
    stop_queue: VecDeque<PendingStop>,
}

impl Inferiors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn add_process(
        &mut self,
        pid: Pid,
        attached: bool,
        tdesc: Arc<TargetDescription>,
    ) -> &mut Process {
        let index = match self.processes.iter().position(|p| p.pid == pid) {
            Some(index) => {
                tracing::warn!("process {} added twice", pid);
                index
            }
            None => {
                tracing::debug!("new process {}", pid);
                self.processes.push(Process {
                    pid,
                    attached,
                    breakpoints: BreakpointTable::new(),
                    tdesc,
                    symbols: HashMap::new(),
                });
                self.processes.len() - 1
            }
        };
        &mut self.processes[index]
    }

    pub fn processes(&self) -> impl Iterator<Item = &Process> {
        self.processes.iter()
    }

    pub fn find_process(&self, pid: Pid) -> Option<&Process> {
        self.processes.iter().find(|p| p.pid == pid)
    }

    pub fn find_process_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.pid == pid)
    }

    /// Remove a process that no longer has threads, taking everything we
    /// patched into its memory out first.
    pub fn remove_process(
        &mut self,
        pid: Pid,
        target: &mut dyn Target,
    ) -> Result<Process, InferiorError> {
        if self.threads.iter().any(|t| t.ptid.pid == pid) {
            tracing::error!("removing process {} which still has threads", pid);
            return Err(InferiorError::ThreadsRemain(pid));
        }
        let index = self
            .processes
            .iter()
            .position(|p| p.pid == pid)
            .ok_or(InferiorError::UnknownProcess(pid))?;
        let mut process = self.processes.remove(index);
        process.symbols.clear();
        process.breakpoints.free_all_breakpoints(target);
        tracing::debug!("removed process {}", pid);
        Ok(process)
    }

    /// Add a thread to a known process. The first thread becomes current if
    /// nothing is.
    pub fn add_thread(&mut self, ptid: Ptid) -> Result<&mut Thread, InferiorError> {
        if self.find_process(ptid.pid).is_none() {
            return Err(InferiorError::UnknownProcess(ptid.pid));
        }
        let index = match self.threads.iter().position(|t| t.ptid == ptid) {
            Some(index) => index,
            None => {
                tracing::debug!("new thread {}", ptid);
                self.threads.push(Thread {
                    ptid,
                    resumed: false,
                    last_action: None,
                    last_signal: 5,
                    regcache: None,
                });
                self.threads.len() - 1
            }
        };
        if self.current.is_none() {
            self.current = Some(ptid);
        }
        Ok(&mut self.threads[index])
    }

    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.iter()
    }

    pub fn threads_of(&self, pid: Pid) -> impl Iterator<Item = &Thread> {
        self.threads.iter().filter(move |t| t.ptid.pid == pid)
    }

    pub fn for_each_thread<F: FnMut(&mut Thread)>(&mut self, f: F) {
        self.threads.iter_mut().for_each(f)
    }

    pub fn find_thread(&self, ptid: Ptid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.ptid == ptid)
    }

    pub fn find_thread_mut(&mut self, ptid: Ptid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.ptid == ptid)
    }

    /// First thread matching a possibly wildcarded thread id.
    pub fn find_matching(&self, threadid: &ThreadId) -> Option<Ptid> {
        self.threads
            .iter()
            .find(|t| t.ptid.matches(threadid))
            .map(|t| t.ptid)
    }

    /// Forget a thread: its branch trace is released, its queued stop
    /// replies dropped and its register cache discarded.
    pub fn remove_thread(&mut self, ptid: Ptid, target: &mut dyn Target) -> Option<Thread> {
        let index = self.threads.iter().position(|t| t.ptid == ptid)?;
        if let Err(err) = target.disable_btrace(ptid) {
            tracing::warn!("failed to disable branch tracing of {}: {}", ptid, err);
        }
        self.discard_queued_stops(ptid);
        let mut thread = self.threads.remove(index);
        thread.regcache = None;
        if self.current == Some(ptid) {
            self.current = None;
        }
        tracing::debug!("removed thread {}", ptid);
        Some(thread)
    }

    pub fn current(&self) -> Option<Ptid> {
        self.current
    }

    pub fn set_current(&mut self, ptid: Ptid) -> Result<(), InferiorError> {
        if self.find_thread(ptid).is_none() {
            return Err(InferiorError::UnknownThread(ptid));
        }
        self.current = Some(ptid);
        Ok(())
    }

    /// A thread together with its process, for operations that need both the
    /// registers and the breakpoints.
    pub fn thread_and_process_mut(&mut self, ptid: Ptid) -> Option<(&mut Thread, &mut Process)> {
        let thread = self.threads.iter_mut().find(|t| t.ptid == ptid)?;
        let process = self.processes.iter_mut().find(|p| p.pid == ptid.pid)?;
        Some((thread, process))
    }

    /// The register cache of `ptid`, allocated on first use. With `fetch`,
    /// the registers are read from the back-end unless the cache already
    /// holds them.
    pub fn regcache(
        &mut self,
        ptid: Ptid,
        target: &mut dyn Target,
        fetch: bool,
    ) -> Result<&mut RegCache, InferiorError> {
        let (thread, process) = self
            .thread_and_process_mut(ptid)
            .ok_or(InferiorError::UnknownThread(ptid))?;
        let regcache = thread
            .regcache
            .get_or_insert_with(|| RegCache::new(process.tdesc.clone()));
        if fetch && !regcache.is_fetched() {
            // Nothing stale may survive a partial fetch.
            let _ = regcache.supply_all(None);
            target.fetch_registers(ptid, regcache)?;
            regcache.set_fetched(true);
            regcache.clear_dirty();
        }
        Ok(regcache)
    }

    /// Drop the cached registers of `ptid`, storing them back first if the
    /// debugger modified them.
    pub fn invalidate_regcache(
        &mut self,
        ptid: Ptid,
        target: &mut dyn Target,
    ) -> Result<(), TargetError> {
        let regcache = match self
            .find_thread_mut(ptid)
            .and_then(|t| t.regcache.as_mut())
        {
            Some(regcache) => regcache,
            None => return Ok(()),
        };
        let result = if regcache.is_fetched() && regcache.is_dirty() {
            target.store_registers(ptid, regcache)
        } else {
            Ok(())
        };
        regcache.clear_dirty();
        regcache.set_fetched(false);
        result
    }

    /// Invalidate the register caches of every thread of `pid`, or of every
    /// thread with `None`.
    pub fn invalidate_regcaches_in(
        &mut self,
        pid: Option<Pid>,
        target: &mut dyn Target,
    ) -> Result<(), TargetError> {
        let ptids: Vec<Ptid> = self
            .threads
            .iter()
            .map(|t| t.ptid)
            .filter(|ptid| pid.map_or(true, |pid| ptid.pid == pid))
            .collect();
        let mut result = Ok(());
        for ptid in ptids {
            if let Err(err) = self.invalidate_regcache(ptid, target) {
                tracing::warn!("failed to store registers of {}: {}", ptid, err);
                result = Err(err);
            }
        }
        result
    }

    pub fn queue_stop(&mut self, ptid: Ptid, reply: Bytes) {
        self.stop_queue.push_back(PendingStop { ptid, reply });
    }

    /// The oldest unacknowledged stop reply.
    pub fn peek_stop(&self) -> Option<&PendingStop> {
        self.stop_queue.front()
    }

    pub fn pop_stop(&mut self) -> Option<PendingStop> {
        self.stop_queue.pop_front()
    }

    pub fn queued_stops(&self) -> usize {
        self.stop_queue.len()
    }

    pub fn discard_queued_stops(&mut self, ptid: Ptid) {
        self.stop_queue.retain(|stop| stop.ptid != ptid);
    }
}
