/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Utilities that support constructing tests for the stub: an in-memory
//! back-end and logging set-up.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::sync::mpsc;

use crate::commands::ResumeAction;
use crate::inferiors::Ptid;
use crate::regcache::RegCache;
use crate::stop::StopEvent;
use crate::stop::StopKind;
use crate::target::*;
use crate::tdesc::TargetDescription;

/// The software breakpoint instruction of the fake target (`int3`).
pub const TRAP: u8 = 0xcc;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Show the stub's logs in test output, filtered with `RUST_LOG` when set.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("remora=trace"));
    let collector = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .finish();

    // Here we ignore errors, because tests may be running in parallel, and we don't care who "wins".
    tracing::subscriber::set_global_default(collector).unwrap_or(());
}

#[derive(Default)]
struct FakeState {
    /// Sparse memory; bytes that were never poked are unmapped.
    memory: BTreeMap<u64, u8>,
    memory_writes: usize,
    fail_writes: bool,
    hardware_points: bool,
    points: HashSet<(PointKind, u64, usize)>,
    registers: HashMap<(Ptid, usize), u64>,
    register_fetches: usize,
    register_stores: usize,
    btrace_disabled: Vec<Ptid>,
    resumes: Vec<ResumeRequest>,
    interrupts: usize,
    killed: Vec<Pid>,
    detached: Vec<Pid>,
    selected: Option<Pid>,
    dead: HashSet<Ptid>,
    symbols: Vec<String>,
    stopped_data_address: Option<u64>,
    events: Option<mpsc::Sender<StopEvent>>,
    auto_step: bool,
}

/// An in-memory back-end. Clones share their state, so a test can keep a
/// handle on a target owned by a session.
#[derive(Clone, Default)]
pub struct FakeTarget {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Map `data` at `addr`, bypassing the write counters.
    pub fn poke(&self, addr: u64, data: &[u8]) {
        let mut state = self.state();
        for (i, b) in data.iter().enumerate() {
            state.memory.insert(addr + i as u64, *b);
        }
    }

    /// Raw memory contents; unmapped bytes read as zero.
    pub fn peek(&self, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state();
        (0..len as u64)
            .map(|i| state.memory.get(&(addr + i)).copied().unwrap_or(0))
            .collect()
    }

    /// Number of `write_memory` calls so far.
    pub fn memory_writes(&self) -> usize {
        self.state().memory_writes
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Accept hardware breakpoints and watchpoints.
    pub fn support_hardware_points(&self, supported: bool) {
        self.state().hardware_points = supported;
    }

    /// Number of hardware points currently inserted.
    pub fn inserted_points(&self) -> usize {
        self.state().points.len()
    }

    pub fn set_register(&self, ptid: Ptid, regno: usize, value: u64) {
        self.state().registers.insert((ptid, regno), value);
    }

    /// Value of `regno` as last set or stored.
    pub fn register(&self, ptid: Ptid, regno: usize) -> Option<u64> {
        self.state().registers.get(&(ptid, regno)).copied()
    }

    pub fn register_fetches(&self) -> usize {
        self.state().register_fetches
    }

    pub fn register_stores(&self) -> usize {
        self.state().register_stores
    }

    pub fn btrace_disabled(&self) -> Vec<Ptid> {
        self.state().btrace_disabled.clone()
    }

    /// Every resume request, in order.
    pub fn resumes(&self) -> Vec<ResumeRequest> {
        self.state().resumes.clone()
    }

    pub fn interrupts(&self) -> usize {
        self.state().interrupts
    }

    pub fn killed(&self) -> Vec<Pid> {
        self.state().killed.clone()
    }

    pub fn detached(&self) -> Vec<Pid> {
        self.state().detached.clone()
    }

    /// The process the last `select_process` pointed at.
    pub fn selected(&self) -> Option<Pid> {
        self.state().selected
    }

    pub fn kill_thread(&self, ptid: Ptid) {
        self.state().dead.insert(ptid);
    }

    pub fn set_symbols(&self, symbols: &[&str]) {
        self.state().symbols = symbols.iter().map(|s| s.to_string()).collect();
    }

    pub fn set_stopped_data_address(&self, addr: Option<u64>) {
        self.state().stopped_data_address = addr;
    }

    /// Stop event channel. The target reports its own stops on it: single
    /// steps when `auto_step` is set, and `SIGINT` stops for interrupts.
    /// Tests push everything else through the returned sender.
    pub fn events(&self, auto_step: bool) -> (mpsc::Sender<StopEvent>, mpsc::Receiver<StopEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut state = self.state();
        state.events = Some(tx.clone());
        state.auto_step = auto_step;
        (tx, rx)
    }

    fn report(state: &FakeState, event: StopEvent) {
        if let Some(tx) = &state.events {
            if tx.try_send(event).is_err() {
                tracing::warn!("dropping stop event of the fake target");
            }
        }
    }
}

impl Target for FakeTarget {
    fn select_process(&mut self, pid: Pid) {
        self.state().selected = Some(pid);
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, TargetError> {
        let state = self.state();
        (0..len as u64)
            .map(|i| {
                state
                    .memory
                    .get(&(addr + i))
                    .copied()
                    .ok_or(TargetError::Errno(Errno::EIO))
            })
            .collect()
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), TargetError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(TargetError::Errno(Errno::EPERM));
        }
        if (0..data.len() as u64).any(|i| !state.memory.contains_key(&(addr + i))) {
            return Err(TargetError::Errno(Errno::EIO));
        }
        state.memory_writes += 1;
        for (i, b) in data.iter().enumerate() {
            state.memory.insert(addr + i as u64, *b);
        }
        Ok(())
    }

    fn sw_breakpoint_from_kind(&self, kind: usize) -> Vec<u8> {
        vec![TRAP; kind]
    }

    fn supports_point(&self, kind: PointKind) -> bool {
        kind == PointKind::Software || self.state().hardware_points
    }

    fn insert_point(&mut self, kind: PointKind, addr: u64, len: usize) -> Result<(), TargetError> {
        let mut state = self.state();
        if !state.hardware_points {
            return Err(TargetError::Unsupported);
        }
        state.points.insert((kind, addr, len));
        Ok(())
    }

    fn remove_point(&mut self, kind: PointKind, addr: u64, len: usize) -> Result<(), TargetError> {
        let mut state = self.state();
        if state.points.remove(&(kind, addr, len)) {
            Ok(())
        } else {
            Err(TargetError::Errno(Errno::ENOENT))
        }
    }

    fn target_description(&self, _pid: Pid) -> Arc<TargetDescription> {
        TargetDescription::amd64()
    }

    fn fetch_registers(&mut self, ptid: Ptid, regcache: &mut RegCache) -> Result<(), TargetError> {
        let mut state = self.state();
        state.register_fetches += 1;
        for regno in 0..regcache.tdesc().num_registers() {
            let value = state.registers.get(&(ptid, regno)).copied().unwrap_or(0);
            regcache
                .write_u64(regno, value)
                .map_err(|_| TargetError::Errno(Errno::EINVAL))?;
        }
        Ok(())
    }

    fn store_registers(&mut self, ptid: Ptid, regcache: &RegCache) -> Result<(), TargetError> {
        let mut state = self.state();
        state.register_stores += 1;
        for regno in 0..regcache.tdesc().num_registers() {
            if let Ok(value) = regcache.read_u64(regno) {
                state.registers.insert((ptid, regno), value);
            }
        }
        Ok(())
    }

    fn stopped_by_watchpoint(&self, _ptid: Ptid) -> bool {
        self.state().stopped_data_address.is_some()
    }

    fn stopped_data_address(&self, _ptid: Ptid) -> Option<u64> {
        self.state().stopped_data_address
    }

    fn resume(&mut self, requests: &[ResumeRequest]) -> Result<(), TargetError> {
        let mut state = self.state();
        state.resumes.extend_from_slice(requests);
        if state.auto_step {
            for request in requests {
                if let (ResumeAction::Step(_), Ok(ptid)) =
                    (request.action, Ptid::try_from(request.thread))
                {
                    Self::report(&state, StopEvent::new(ptid, StopKind::SingleStep));
                }
            }
        }
        Ok(())
    }

    fn interrupt(&mut self) -> Result<(), TargetError> {
        let mut state = self.state();
        state.interrupts += 1;
        if let Some(ptid) = state
            .resumes
            .last()
            .and_then(|request| Ptid::try_from(request.thread).ok())
        {
            Self::report(&state, StopEvent::new(ptid, StopKind::Signal(Signal::SIGINT)));
        }
        Ok(())
    }

    fn thread_alive(&self, ptid: Ptid) -> bool {
        !self.state().dead.contains(&ptid)
    }

    fn kill(&mut self, pid: Pid) -> Result<(), TargetError> {
        self.state().killed.push(pid);
        Ok(())
    }

    fn detach(&mut self, pid: Pid) -> Result<(), TargetError> {
        self.state().detached.push(pid);
        Ok(())
    }

    fn disable_btrace(&mut self, ptid: Ptid) -> Result<(), TargetError> {
        self.state().btrace_disabled.push(ptid);
        Ok(())
    }

    fn symbols_to_look_up(&self) -> Vec<String> {
        self.state().symbols.clone()
    }
}
