/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::collections::HashSet;
use std::collections::VecDeque;

use bytes::Bytes;
use bytes::BytesMut;
use nix::unistd::Pid;
use tokio::sync::mpsc;

use crate::commands::*;
use crate::config::StubConfig;
use crate::connection::Connection;
use crate::connection::Incoming;
use crate::error::Error;
use crate::inferiors::InferiorError;
use crate::inferiors::Inferiors;
use crate::inferiors::Ptid;
use crate::packet::Frame;
use crate::response::*;
use crate::stop::*;
use crate::target::PointKind;
use crate::target::ResumeRequest;
use crate::target::Target;

/// gdb's `SIGTRAP`, reported for breakpoints, steps and the other events
/// that have no signal of their own.
const GDB_SIGTRAP: u8 = 5;

/// What a packet handler wants sent back.
enum Reply {
    Packet(Bytes),
    /// Nothing right now: the reply is a stop reply still to come, or was
    /// already sent.
    Later,
    /// End the session without a reply.
    Exit,
}

impl Reply {
    fn ok() -> Self {
        Reply::Packet(Bytes::from_static(b"OK"))
    }

    fn empty() -> Self {
        Reply::Packet(Bytes::new())
    }
}

enum Wakeup {
    Frame(Option<Frame>),
    Event(Option<StopEvent>),
}

/// Gdb session manager.
///
/// Serves one debugger connection: packets are received over `conn`, stop
/// events over `events`. The session ends when the client disconnects,
/// kills the inferiors, or detaches from the last process.
pub struct Session<T> {
    config: StubConfig,
    conn: Connection,
    target: T,
    events: mpsc::Receiver<StopEvent>,
    inferiors: Inferiors,

    /// Thread ids carry the process, as agreed in `qSupported`.
    multiprocess: bool,
    non_stop: bool,
    /// Report thread creation and exit, set by `QThreadEvents`.
    thread_events: bool,
    report_swbreak: bool,
    report_hwbreak: bool,
    report_fork: bool,
    report_vfork: bool,
    report_exec: bool,
    report_no_resumed: bool,

    /// Thread resumed by `c` and `s`, set by `Hc`.
    cont_thread: ThreadId,
    /// All-stop mode: the last resume request, repeated after a stop the
    /// debugger is not told about.
    last_resume: Vec<(ResumeAction, ThreadId)>,
    /// All-stop mode: the debugger waits for a stop reply.
    waiting: bool,
    /// Packets that arrived while waiting for a stop, in arrival order.
    deferred: VecDeque<BytesMut>,
    /// Stop events received while waiting for another one.
    pending_events: VecDeque<StopEvent>,
    last_reply: Option<StopReply>,
    /// Symbols asked for since the last `qSymbol::`.
    asked_symbols: HashSet<String>,
    /// A debugger is listening. False after a detach that left the
    /// inferiors running under our control.
    connected: bool,
}

impl<T: Target> Session<T> {
    pub fn new(
        config: StubConfig,
        conn: Connection,
        target: T,
        events: mpsc::Receiver<StopEvent>,
    ) -> Self {
        Session {
            thread_events: config.thread_events,
            config,
            conn,
            target,
            events,
            inferiors: Inferiors::new(),
            multiprocess: false,
            non_stop: false,
            report_swbreak: false,
            report_hwbreak: false,
            report_fork: false,
            report_vfork: false,
            report_exec: false,
            report_no_resumed: false,
            cont_thread: ThreadId::all(),
            last_resume: Vec::new(),
            waiting: false,
            deferred: VecDeque::new(),
            pending_events: VecDeque::new(),
            last_reply: None,
            asked_symbols: HashSet::new(),
            connected: true,
        }
    }

    /// Register a stopped process and its threads before serving the
    /// debugger. The first thread becomes the current one.
    pub fn attach(&mut self, pid: Pid, attached: bool, tids: &[Pid]) -> Result<(), Error> {
        let tdesc = self.target.target_description(pid);
        let process = self.inferiors.add_process(pid, attached, tdesc);
        process
            .breakpoints
            .set_stack_limit(self.config.max_agent_stack);
        for tid in tids {
            self.inferiors.add_thread(Ptid { pid, tid: *tid })?;
        }
        Ok(())
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn inferiors(&self) -> &Inferiors {
        &self.inferiors
    }

    /// Serve the debugger until the session ends.
    pub async fn run(&mut self) -> Result<(), Error> {
        loop {
            if !self.waiting {
                if let Some(packet) = self.deferred.pop_front() {
                    if self.handle_packet(packet).await? {
                        return Ok(());
                    }
                    continue;
                }
            }
            let listening = self.non_stop || self.waiting;
            if listening {
                if let Some(event) = self.pending_events.pop_front() {
                    self.process_event(event).await?;
                    continue;
                }
            }

            // Stops are reported before any packet that came in meanwhile.
            let wakeup = tokio::select! {
                biased;
                event = self.events.recv(), if listening => Wakeup::Event(event),
                frame = self.conn.next_frame() => Wakeup::Frame(frame),
            };

            match wakeup {
                Wakeup::Frame(None) => {
                    tracing::info!("gdb client disconnected");
                    return Ok(());
                }
                Wakeup::Frame(Some(frame)) => match self.conn.accept(frame).await? {
                    Some(Incoming::Packet(packet)) => {
                        if self.waiting && !serves_while_running(&packet) {
                            tracing::trace!("deferring packet until the inferior stops");
                            self.deferred.push_back(packet);
                        } else if self.handle_packet(packet).await? {
                            return Ok(());
                        }
                    }
                    Some(Incoming::Interrupt) => self.interrupt(),
                    None => {}
                },
                Wakeup::Event(event) => {
                    let event = event.ok_or(Error::GdbServerStopEventRecvError)?;
                    self.process_event(event).await?;
                }
            }
        }
    }

    fn interrupt(&mut self) {
        if !self.waiting {
            tracing::debug!("ignoring interrupt, nothing is running");
            return;
        }
        if let Err(err) = self.target.interrupt() {
            tracing::warn!("failed to interrupt the inferior: {}", err);
        }
    }

    /// Handle one packet, returning true when the session is over.
    async fn handle_packet(&mut self, packet: BytesMut) -> Result<bool, Error> {
        let reply = match Command::try_parse(packet) {
            Ok(Command::Base(cmd)) => self.handle_base(cmd).await?,
            Ok(Command::Unknown(cmd)) => {
                tracing::trace!("unknown command: {}", String::from_utf8_lossy(&cmd));
                Reply::empty()
            }
            Err(CommandParseError::Empty) => Reply::empty(),
            Err(err) => {
                tracing::warn!("{}", err);
                Reply::Packet(Bytes::from_static(b"E01"))
            }
        };
        match reply {
            Reply::Packet(payload) => {
                self.conn.send_packet(&payload).await?;
                Ok(false)
            }
            Reply::Later => Ok(false),
            Reply::Exit => Ok(true),
        }
    }

    fn writer(&self) -> ResponseWriter {
        ResponseWriter::new(self.multiprocess)
    }

    fn respond<R: WriteResponse>(&self, resp: R) -> Reply {
        let mut writer = self.writer();
        resp.write_response(&mut writer);
        Reply::Packet(writer.finish())
    }

    /// handle gdb remote base command
    async fn handle_base(&mut self, cmd: Base) -> Result<Reply, Error> {
        let reply = match cmd {
            Base::QuestionMark(_) => self.status(),
            Base::c(c) => self.resume_legacy(c.addr, ResumeAction::Continue(None)).await,
            Base::s(s) => self.resume_legacy(s.addr, ResumeAction::Step(None)).await,
            Base::D(d) => return self.detach(d.pid).await,
            Base::g(_) => {
                let regs = self
                    .general_thread()
                    .and_then(|ptid| Ok(self.inferiors.regcache(ptid, &mut self.target, true)?))
                    .map(|regcache| ResponseAsPlain(regcache.registers_to_string()));
                self.respond(regs)
            }
            Base::G(regs) => {
                let result = self.general_thread().and_then(|ptid| {
                    let regcache = self.inferiors.regcache(ptid, &mut self.target, true)?;
                    Ok(regcache.registers_from_string(&regs.vals)?)
                });
                self.respond(result.map(|_| ResponseOk))
            }
            Base::H(h) => {
                let result = self.set_thread(h.op, h.id);
                self.respond(result.map(|_| ResponseOk))
            }
            Base::k(_) => {
                self.kill_all();
                return Ok(Reply::Exit);
            }
            Base::m(m) => {
                let len = m.length.min(self.config.packet_size / 2);
                let result = self.read_memory(m.addr, len).map(ResponseAsHex);
                self.respond(result)
            }
            Base::M(mem) => {
                let result = self.write_memory(mem.addr, &mem.vals);
                self.respond(result.map(|_| ResponseOk))
            }
            Base::X(mem) => {
                let result = self.write_memory(mem.addr, &mem.vals);
                self.respond(result.map(|_| ResponseOk))
            }
            Base::p(p) => {
                let result = self.general_thread().and_then(|ptid| {
                    let regcache = self.inferiors.regcache(ptid, &mut self.target, true)?;
                    Ok(regcache.register_to_string(p.reg_id)?)
                });
                self.respond(result.map(ResponseAsPlain))
            }
            Base::P(p) => {
                let result = self.general_thread().and_then(|ptid| {
                    let regcache = self.inferiors.regcache(ptid, &mut self.target, true)?;
                    Ok(regcache.register_from_string(p.reg_id, &p.val)?)
                });
                self.respond(result.map(|_| ResponseOk))
            }
            Base::qAttached(q) => {
                let pid = q.pid.map(Pid::from_raw).or_else(|| self.current_pid());
                match pid.and_then(|pid| self.inferiors.find_process(pid)) {
                    Some(process) if process.attached => Reply::Packet(Bytes::from_static(b"1")),
                    Some(_) => Reply::Packet(Bytes::from_static(b"0")),
                    None => Reply::Packet(Bytes::from_static(b"E01")),
                }
            }
            Base::qC(_) => match self.inferiors.current() {
                Some(ptid) => {
                    let mut writer = self.writer();
                    writer.put_str("QC");
                    ThreadId::from(ptid).write_response(&mut writer);
                    Reply::Packet(writer.finish())
                }
                None => Reply::empty(),
            },
            Base::qfThreadInfo(_) => {
                let mut writer = self.writer();
                let mut threads = self.inferiors.threads().peekable();
                if threads.peek().is_none() {
                    writer.put_str("l");
                } else {
                    writer.put_str("m");
                    for (i, thread) in threads.enumerate() {
                        if i > 0 {
                            writer.put_str(",");
                        }
                        ThreadId::from(thread.ptid).write_response(&mut writer);
                    }
                }
                Reply::Packet(writer.finish())
            }
            Base::qsThreadInfo(_) => Reply::Packet(Bytes::from_static(b"l")),
            Base::qSupported(features) => self.supported(&features),
            Base::QStartNoAckMode(_) => {
                if !self.config.allow_no_ack {
                    Reply::empty()
                } else {
                    // Acked like any other packet; only what follows is not.
                    self.conn.send_packet(b"OK").await?;
                    self.conn.set_no_ack(true);
                    tracing::debug!("entering no-ack mode");
                    Reply::Later
                }
            }
            Base::QNonStop(q) => self.set_non_stop(q.enable),
            Base::QThreadEvents(q) => {
                self.thread_events = q.enable;
                Reply::ok()
            }
            Base::qSymbol(q) => self.lookup_symbols(q),
            Base::qXfer(qXfer::FeaturesRead { annex, offset, len }) => {
                self.read_features(&annex, offset, len)
            }
            Base::T(t) => match self.inferiors.find_matching(&t.id) {
                Some(ptid) if self.target.thread_alive(ptid) => Reply::ok(),
                _ => Reply::Packet(Bytes::from_static(b"E01")),
            },
            Base::vCont(vCont::Query) => {
                Reply::Packet(Bytes::from_static(b"vCont;c;C;s;S;t;r"))
            }
            Base::vCont(vCont::Actions(actions)) => self.resume_and_reply(actions).await,
            Base::vKill(v) => {
                self.kill_process(v.pid);
                Reply::ok()
            }
            Base::vStopped(_) => {
                self.inferiors.pop_stop();
                match self.inferiors.peek_stop() {
                    Some(stop) => Reply::Packet(stop.reply.clone()),
                    None => Reply::ok(),
                }
            }
            Base::z(z) => {
                let result = self.remove_point(z.kind, z.addr, z.size);
                self.respond(result.map(|_| ResponseOk))
            }
            Base::Z(z) => {
                let result = self.insert_point(z.kind, z.addr, z.size, &z.options);
                self.respond(result.map(|_| ResponseOk))
            }
        };
        Ok(reply)
    }

    /// The thread `g`, `m` and friends act on.
    fn general_thread(&self) -> Result<Ptid, Error> {
        self.inferiors
            .current()
            .or_else(|| self.inferiors.threads().next().map(|t| t.ptid))
            .ok_or(Error::Detached)
    }

    fn current_pid(&self) -> Option<Pid> {
        self.inferiors
            .current()
            .map(|ptid| ptid.pid)
            .or_else(|| self.inferiors.processes().next().map(|p| p.pid))
    }

    fn set_thread(&mut self, op: ThreadOp, id: ThreadId) -> Result<(), Error> {
        match op {
            ThreadOp::c => {
                self.cont_thread = id;
                Ok(())
            }
            ThreadOp::g | ThreadOp::G | ThreadOp::m | ThreadOp::M => {
                if id.tid == IdKind::Any || id == ThreadId::all() {
                    // Any thread will do; keep the one we have.
                    if self.inferiors.current().is_none() {
                        let ptid = self.general_thread()?;
                        self.inferiors.set_current(ptid)?;
                    }
                    return Ok(());
                }
                let ptid = self
                    .inferiors
                    .find_matching(&id)
                    .ok_or(InferiorError::ThreadIdNotSpecified)?;
                self.inferiors.set_current(ptid)?;
                Ok(())
            }
        }
    }

    fn read_memory(&mut self, addr: u64, len: usize) -> Result<Vec<u8>, Error> {
        let pid = self.current_pid().ok_or(Error::Detached)?;
        self.target.select_process(pid);
        let process = self
            .inferiors
            .find_process_mut(pid)
            .ok_or(InferiorError::UnknownProcess(pid))?;
        let mut buf = vec![0; len];
        process
            .breakpoints
            .read_memory(&mut self.target, addr, &mut buf)?;
        Ok(buf)
    }

    fn write_memory(&mut self, addr: u64, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let pid = self.current_pid().ok_or(Error::Detached)?;
        self.target.select_process(pid);
        let process = self
            .inferiors
            .find_process_mut(pid)
            .ok_or(InferiorError::UnknownProcess(pid))?;
        process
            .breakpoints
            .write_memory(&mut self.target, addr, data)?;
        Ok(())
    }

    fn insert_point(
        &mut self,
        kind: PointKind,
        addr: u64,
        size: usize,
        options: &[u8],
    ) -> Result<(), Error> {
        let pid = self.current_pid().ok_or(Error::Detached)?;
        self.target.select_process(pid);
        let process = self
            .inferiors
            .find_process_mut(pid)
            .ok_or(InferiorError::UnknownProcess(pid))?;
        let id = process
            .breakpoints
            .set_gdb_breakpoint(&mut self.target, kind, addr, size)?;
        if !kind.is_watchpoint() {
            process.breakpoints.clear_conditions_and_commands(id);
            process.breakpoints.process_point_options(id, options);
        }
        Ok(())
    }

    fn remove_point(&mut self, kind: PointKind, addr: u64, size: usize) -> Result<(), Error> {
        let pid = self.current_pid().ok_or(Error::Detached)?;
        self.target.select_process(pid);
        let process = self
            .inferiors
            .find_process_mut(pid)
            .ok_or(InferiorError::UnknownProcess(pid))?;
        process
            .breakpoints
            .delete_gdb_breakpoint(&mut self.target, kind, addr, size)?;
        Ok(())
    }

    fn supported(&mut self, features: &qSupported) -> Reply {
        self.multiprocess = self.config.multiprocess && features.supports("multiprocess");
        self.report_swbreak = features.supports("swbreak");
        self.report_hwbreak = features.supports("hwbreak");
        self.report_fork = features.supports("fork-events");
        self.report_vfork = features.supports("vfork-events");
        self.report_exec = features.supports("exec-events");
        self.report_no_resumed = features.supports("no-resumed");

        let mut writer = self.writer();
        writer.put_str("PacketSize=");
        writer.put_num(self.config.packet_size);
        writer.put_str(";swbreak+;hwbreak+;qXfer:features:read+;QThreadEvents+");
        writer.put_str(";vContSupported+;ConditionalBreakpoints+;BreakpointCommands+");
        if self.config.allow_no_ack {
            writer.put_str(";QStartNoAckMode+");
        }
        if self.config.multiprocess {
            writer.put_str(";multiprocess+");
        }
        if self.config.non_stop {
            writer.put_str(";QNonStop+");
        }
        if self.report_fork {
            writer.put_str(";fork-events+");
        }
        if self.report_vfork {
            writer.put_str(";vfork-events+");
        }
        if self.report_exec {
            writer.put_str(";exec-events+");
        }
        if self.report_no_resumed {
            writer.put_str(";no-resumed+");
        }
        Reply::Packet(writer.finish())
    }

    fn set_non_stop(&mut self, enable: bool) -> Reply {
        if enable && !self.config.non_stop {
            return Reply::Packet(Bytes::from_static(b"E01"));
        }
        if !enable && self.inferiors.threads().any(|t| t.resumed) {
            tracing::warn!("refusing to leave non-stop mode with threads running");
            return Reply::Packet(Bytes::from_static(b"E01"));
        }
        if self.non_stop != enable {
            tracing::debug!("non-stop mode {}", if enable { "on" } else { "off" });
            while self.inferiors.pop_stop().is_some() {}
            self.non_stop = enable;
        }
        Reply::ok()
    }

    fn lookup_symbols(&mut self, q: qSymbol) -> Reply {
        let pid = match self.current_pid() {
            Some(pid) => pid,
            None => return Reply::ok(),
        };
        match q {
            qSymbol::Ready => self.asked_symbols.clear(),
            qSymbol::Value { name, addr } => match addr {
                Some(addr) => {
                    if let Some(process) = self.inferiors.find_process_mut(pid) {
                        tracing::debug!("symbol {} is at {:#x}", name, addr);
                        process.cache_symbol(&name, addr);
                    }
                }
                None => tracing::debug!("debugger does not know symbol {}", name),
            },
        }
        let wanted = self.target.symbols_to_look_up();
        let next = wanted.into_iter().find(|name| {
            !self.asked_symbols.contains(name)
                && self
                    .inferiors
                    .find_process(pid)
                    .map_or(false, |p| p.symbol(name).is_none())
        });
        match next {
            Some(name) => {
                let mut writer = self.writer();
                writer.put_str("qSymbol:");
                writer.put_hex_encoded(name.as_bytes());
                self.asked_symbols.insert(name);
                Reply::Packet(writer.finish())
            }
            None => Reply::ok(),
        }
    }

    fn read_features(&self, annex: &str, offset: usize, len: usize) -> Reply {
        if annex != "target.xml" {
            return Reply::Packet(Bytes::from_static(b"E00"));
        }
        let process = match self
            .current_pid()
            .and_then(|pid| self.inferiors.find_process(pid))
        {
            Some(process) => process,
            None => return Reply::Packet(Bytes::from_static(b"E01")),
        };
        let xml = process.tdesc().to_xml();
        let xml = xml.as_bytes();
        let mut writer = self.writer();
        if offset >= xml.len() {
            writer.put_str("l");
        } else {
            // Escaping may double the size of the chunk.
            let len = len.min(self.config.packet_size / 2);
            let end = xml.len().min(offset.saturating_add(len));
            writer.put_str(if end < xml.len() { "m" } else { "l" });
            writer.put_binary_encoded(&xml[offset..end]);
        }
        Reply::Packet(writer.finish())
    }

    /// Reply to `?`.
    fn status(&mut self) -> Reply {
        if self.non_stop {
            while self.inferiors.pop_stop().is_some() {}
            let stopped: Vec<(Ptid, u8)> = self
                .inferiors
                .threads()
                .filter(|t| !t.resumed)
                .map(|t| (t.ptid, t.last_signal))
                .collect();
            for (ptid, signal) in stopped {
                let reply = self.stopped_reply(ptid, signal, None);
                let payload = self.encode(&reply);
                self.inferiors.queue_stop(ptid, payload);
            }
            return match self.inferiors.peek_stop() {
                Some(stop) => Reply::Packet(stop.reply.clone()),
                None => Reply::ok(),
            };
        }

        let thread = self
            .general_thread()
            .ok()
            .and_then(|ptid| self.inferiors.find_thread(ptid))
            .map(|t| (t.ptid, t.last_signal));
        match thread {
            Some((ptid, signal)) => {
                let reply = self.stopped_reply(ptid, signal, None);
                Reply::Packet(self.encode(&reply))
            }
            None => match &self.last_reply {
                Some(
                    reply @ (StopReply::Exited { .. } | StopReply::Terminated { .. }),
                ) => Reply::Packet(self.encode(reply)),
                _ => Reply::Packet(Bytes::from_static(b"W00")),
            },
        }
    }

    fn encode(&self, reply: &StopReply) -> Bytes {
        let mut writer = self.writer();
        reply.write_response(&mut writer);
        writer.finish()
    }

    /// A `T` stop reply for `ptid`, with the registers gdb wants right away.
    fn stopped_reply(&mut self, ptid: Ptid, signal: u8, reason: Option<StopReason>) -> StopReply {
        let regs: Vec<(usize, Vec<u8>)> = match self.inferiors.regcache(ptid, &mut self.target, true) {
            Ok(regcache) => {
                let regcache = &*regcache;
                regcache
                    .tdesc()
                    .expedite_regs()
                    .iter()
                    .filter_map(|&regno| regcache.collect(regno).ok().map(|v| (regno, v.to_vec())))
                    .collect()
            }
            Err(err) => {
                tracing::warn!("failed to fetch registers of {}: {}", ptid, err);
                Vec::new()
            }
        };
        StopReply::Stopped {
            ptid,
            signal,
            reason,
            regs,
        }
    }

    fn read_pc(&mut self, ptid: Ptid) -> Result<u64, Error> {
        let regcache = self.inferiors.regcache(ptid, &mut self.target, true)?;
        Ok(regcache.read_pc()?)
    }

    /// `c` and `s`: resume the `Hc` thread, or everything.
    async fn resume_legacy(&mut self, addr: Option<u64>, action: ResumeAction) -> Reply {
        if let Some(addr) = addr {
            let result = self.general_thread().and_then(|ptid| {
                let regcache = self.inferiors.regcache(ptid, &mut self.target, true)?;
                Ok(regcache.write_pc(addr)?)
            });
            if let Err(err) = result {
                return self.respond(Err::<ResponseNone, _>(err));
            }
        }
        let thread = match self.cont_thread {
            id if id.tid == IdKind::Any || id.tid == IdKind::All => ThreadId::all(),
            id => id,
        };
        self.resume_and_reply(vec![(action, thread)]).await
    }

    async fn resume_and_reply(&mut self, actions: Vec<(ResumeAction, ThreadId)>) -> Reply {
        match self.resume(&actions).await {
            Ok(()) if self.non_stop => Reply::ok(),
            Ok(()) => Reply::Later,
            Err(err) => {
                tracing::warn!("failed to resume: {}", err);
                self.respond(Err::<ResponseNone, _>(err))
            }
        }
    }

    /// Resume every stopped thread matching one of `actions`; the first
    /// matching action wins. `Stop` applies to running threads only.
    async fn resume(&mut self, actions: &[(ResumeAction, ThreadId)]) -> Result<(), Error> {
        let mut requests = Vec::new();
        for thread in self.inferiors.threads() {
            let action = match actions.iter().find(|(_, id)| thread.ptid.matches(id)) {
                Some((action, _)) => *action,
                None => continue,
            };
            let wanted = if action == ResumeAction::Stop {
                thread.resumed
            } else {
                !thread.resumed
            };
            if wanted {
                requests.push((thread.ptid, action));
            }
        }
        if requests.is_empty() {
            return if self.non_stop {
                Ok(())
            } else {
                Err(Error::NothingToResume)
            };
        }

        for (ptid, action) in requests {
            if action == ResumeAction::Stop {
                self.target.resume(&[ResumeRequest {
                    thread: ptid.into(),
                    action,
                }])?;
                continue;
            }
            if let Some(event) = self.resume_thread(ptid, action).await? {
                self.pending_events.push_back(event);
            }
        }
        if !self.non_stop {
            self.last_resume = actions.to_vec();
            self.waiting = true;
        }
        Ok(())
    }

    /// Resume one thread, stepping it over a breakpoint at its pc first.
    /// Returns a stop event when that step already produced one.
    async fn resume_thread(
        &mut self,
        ptid: Ptid,
        action: ResumeAction,
    ) -> Result<Option<StopEvent>, Error> {
        let pc = match self.read_pc(ptid) {
            Ok(pc) => Some(pc),
            Err(err) => {
                tracing::debug!("no pc for {}: {}", ptid, err);
                None
            }
        };
        self.inferiors.invalidate_regcache(ptid, &mut self.target)?;

        if let Some(pc) = pc {
            let occupied = self.inferiors.find_process(ptid.pid).map_or(false, |p| {
                p.breakpoints.breakpoint_inserted_here(pc)
                    || p
                        .breakpoints
                        .find_fast_tracepoint_jump_at(pc)
                        .and_then(|id| p.breakpoints.fast_tracepoint_jump(id))
                        .map_or(false, |jump| jump.inserted)
            });
            if occupied {
                return self.step_over(ptid, pc, action).await;
            }
        }

        self.target.resume(&[ResumeRequest {
            thread: ptid.into(),
            action,
        }])?;
        self.set_resumed(ptid, action);
        Ok(None)
    }

    fn set_resumed(&mut self, ptid: Ptid, action: ResumeAction) {
        if let Some(thread) = self.inferiors.find_thread_mut(ptid) {
            thread.resumed = true;
            thread.last_action = Some(action);
        }
    }

    /// Single-step `ptid` off the breakpoints at `pc` with them taken out of
    /// memory, then put them back.
    async fn step_over(
        &mut self,
        ptid: Ptid,
        pc: u64,
        action: ResumeAction,
    ) -> Result<Option<StopEvent>, Error> {
        tracing::debug!("stepping {} over the breakpoint at {:#x}", ptid, pc);
        self.set_inserted_at(ptid.pid, pc, false);

        let signal = match action {
            ResumeAction::Step(sig) | ResumeAction::Continue(sig) => sig,
            _ => None,
        };
        let step = self.target.resume(&[ResumeRequest {
            thread: ptid.into(),
            action: ResumeAction::Step(signal),
        }]);
        if let Err(err) = step {
            self.set_inserted_at(ptid.pid, pc, true);
            return Err(err.into());
        }
        self.set_resumed(ptid, action);

        let event = loop {
            let event = self
                .events
                .recv()
                .await
                .ok_or(Error::GdbServerStopEventRecvError)?;
            if event.ptid == ptid {
                break event;
            }
            self.pending_events.push_back(event);
        };
        self.set_inserted_at(ptid.pid, pc, true);

        if !matches!(action, ResumeAction::Step(_)) && event.kind == StopKind::SingleStep {
            self.inferiors.invalidate_regcache(ptid, &mut self.target)?;
            self.target.resume(&[ResumeRequest {
                thread: ptid.into(),
                action,
            }])?;
            return Ok(None);
        }
        Ok(Some(event))
    }

    /// Take the breakpoints and jumps at `pc` out of memory, or put them
    /// back.
    fn set_inserted_at(&mut self, pid: Pid, pc: u64, inserted: bool) {
        self.target.select_process(pid);
        if let Some(process) = self.inferiors.find_process_mut(pid) {
            let table = &mut process.breakpoints;
            if inserted {
                table.reinsert_breakpoints_at(&mut self.target, pc);
                table.reinsert_fast_tracepoint_jumps_at(&mut self.target, pc);
            } else {
                table.uninsert_fast_tracepoint_jumps_at(&mut self.target, pc);
                table.uninsert_breakpoints_at(&mut self.target, pc);
            }
        }
    }

    /// Let the inferior go on after a stop the debugger is not told about.
    /// Returns false when nothing could be resumed.
    async fn resume_silently(&mut self, ptid: Ptid) -> Result<bool, Error> {
        if self.non_stop {
            let action = match self.inferiors.find_thread(ptid) {
                Some(thread) => thread.last_action.unwrap_or(ResumeAction::Continue(None)),
                None => return Ok(false),
            };
            if let Some(event) = self.resume_thread(ptid, action).await? {
                self.pending_events.push_back(event);
            }
            return Ok(true);
        }
        let actions = std::mem::take(&mut self.last_resume);
        let result = self.resume(&actions).await;
        self.last_resume = actions;
        match result {
            Ok(()) => Ok(true),
            Err(Error::NothingToResume) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn process_event(&mut self, event: StopEvent) -> Result<(), Error> {
        tracing::debug!("stop event {:?}", event);
        if let Some(reply) = self.handle_stop(event).await? {
            self.report(reply).await?;
        }
        Ok(())
    }

    fn mark_stopped(&mut self, ptid: Ptid) {
        if self.non_stop {
            if let Some(thread) = self.inferiors.find_thread_mut(ptid) {
                thread.resumed = false;
            }
        } else {
            // Everything stops together in all-stop mode.
            self.inferiors.for_each_thread(|t| t.resumed = false);
        }
    }

    /// Update our books for a stop event and work out what, if anything,
    /// the debugger gets told.
    async fn handle_stop(&mut self, event: StopEvent) -> Result<Option<StopReply>, Error> {
        let StopEvent { ptid, kind } = event;
        let process_wide = matches!(
            kind,
            StopKind::ThreadCreated | StopKind::Exited(_) | StopKind::Terminated(_) | StopKind::NoResumed
        );
        if !process_wide && self.inferiors.find_thread(ptid).is_none() {
            tracing::warn!("ignoring {:?} of unknown thread {}", kind, ptid);
            return Ok(None);
        }
        self.mark_stopped(ptid);

        let reply = match kind {
            StopKind::ThreadCreated => {
                if let Err(err) = self.inferiors.add_thread(ptid) {
                    tracing::warn!("new thread {}: {}", ptid, err);
                    return Ok(None);
                }
                if self.thread_events {
                    self.stopped_reply(ptid, GDB_SIGTRAP, Some(StopReason::Create))
                } else {
                    return self.swallow(ptid, None).await;
                }
            }
            StopKind::Forked(child) | StopKind::Vforked(child) => {
                let vfork = matches!(kind, StopKind::Vforked(_));
                return self.handle_fork(ptid, child, vfork).await;
            }
            StopKind::VforkDone => {
                if self.report_vfork {
                    self.stopped_reply(ptid, GDB_SIGTRAP, Some(StopReason::VforkDone))
                } else {
                    return self.swallow(ptid, None).await;
                }
            }
            StopKind::Exec(path) => {
                self.handle_exec(ptid);
                let reason = if self.report_exec {
                    Some(StopReason::Exec(path))
                } else {
                    None
                };
                self.stopped_reply(ptid, GDB_SIGTRAP, reason)
            }
            StopKind::ThreadExited(code) => {
                self.inferiors.remove_thread(ptid, &mut self.target);
                if self.thread_events {
                    StopReply::ThreadExited { ptid, code }
                } else {
                    return self.swallow(ptid, Some(StopReply::NoResumed)).await;
                }
            }
            StopKind::Exited(code) => {
                self.remove_process(ptid.pid);
                StopReply::Exited {
                    pid: ptid.pid,
                    code,
                }
            }
            StopKind::Terminated(sig) => {
                self.remove_process(ptid.pid);
                StopReply::Terminated {
                    pid: ptid.pid,
                    signal: to_gdb_signal(sig),
                }
            }
            StopKind::NoResumed => {
                if self.report_no_resumed {
                    StopReply::NoResumed
                } else {
                    tracing::debug!("no thread left running");
                    return Ok(None);
                }
            }
            StopKind::Signal(sig) => self.stopped_reply(ptid, to_gdb_signal(sig), None),
            StopKind::Stopped => self.stopped_reply(ptid, 0, None),
            StopKind::SyscallEntry(nr) => {
                self.stopped_reply(ptid, GDB_SIGTRAP, Some(StopReason::SyscallEntry(nr)))
            }
            StopKind::SyscallReturn(nr) => {
                self.stopped_reply(ptid, GDB_SIGTRAP, Some(StopReason::SyscallReturn(nr)))
            }
            StopKind::SwBreakpoint
            | StopKind::HwBreakpoint
            | StopKind::SingleStep
            | StopKind::Watchpoint => return self.handle_trap(ptid, kind).await,
        };
        Ok(Some(reply))
    }

    /// Resume after an event the debugger does not get to see. If nothing
    /// could be resumed, `fallback` (or a plain `SIGTRAP` stop) is reported
    /// instead so the debugger is not left waiting.
    async fn swallow(
        &mut self,
        ptid: Ptid,
        fallback: Option<StopReply>,
    ) -> Result<Option<StopReply>, Error> {
        if self.resume_silently(ptid).await? {
            return Ok(None);
        }
        match fallback {
            Some(reply) => Ok(Some(reply)),
            None => Ok(Some(self.stopped_reply(ptid, GDB_SIGTRAP, None))),
        }
    }

    async fn handle_fork(
        &mut self,
        ptid: Ptid,
        child: Ptid,
        vfork: bool,
    ) -> Result<Option<StopReply>, Error> {
        let announced = if vfork {
            self.report_vfork
        } else {
            self.report_fork
        };
        let parent = match self.inferiors.find_process(ptid.pid) {
            Some(parent) => parent,
            None => return Ok(None),
        };

        if announced {
            let table = parent.breakpoints.clone_for_fork();
            let attached = parent.attached;
            let tdesc = self.target.target_description(child.pid);
            let process = self.inferiors.add_process(child.pid, attached, tdesc);
            process.breakpoints = table;
            self.inferiors.add_thread(child)?;
            let reason = if vfork {
                StopReason::Vfork(child)
            } else {
                StopReason::Fork(child)
            };
            return Ok(Some(self.stopped_reply(ptid, GDB_SIGTRAP, Some(reason))));
        }

        // The child inherited our patches but nobody will debug it.
        self.target.select_process(child.pid);
        parent.breakpoints.detach_breakpoints(&mut self.target);
        self.target.select_process(ptid.pid);
        if let Err(err) = self.target.detach(child.pid) {
            tracing::warn!("failed to detach fork child {}: {}", child.pid, err);
        }
        self.swallow(ptid, None).await
    }

    fn handle_exec(&mut self, ptid: Ptid) {
        let others: Vec<Ptid> = self
            .inferiors
            .threads_of(ptid.pid)
            .map(|t| t.ptid)
            .filter(|t| *t != ptid)
            .collect();
        for other in others {
            self.inferiors.remove_thread(other, &mut self.target);
        }
        if let Err(err) = self.inferiors.invalidate_regcache(ptid, &mut self.target) {
            tracing::debug!("dropping registers of {}: {}", ptid, err);
        }
        // The new image replaced whatever we had patched in.
        if let Some(process) = self.inferiors.find_process_mut(ptid.pid) {
            process.breakpoints.mark_breakpoints_out();
            process.breakpoints.free_all_breakpoints(&mut self.target);
        }
    }

    async fn handle_trap(&mut self, ptid: Ptid, kind: StopKind) -> Result<Option<StopReply>, Error> {
        let pc = match self.read_pc(ptid) {
            Ok(pc) => pc,
            Err(err) => {
                tracing::warn!("no pc for {}: {}", ptid, err);
                return Ok(Some(self.stopped_reply(ptid, GDB_SIGTRAP, None)));
            }
        };
        let stepping = self
            .inferiors
            .find_thread(ptid)
            .and_then(|t| t.last_action)
            .map_or(false, |action| action.is_step());

        self.target.select_process(ptid.pid);
        let target: &mut dyn Target = &mut self.target;
        let (thread, process) = self
            .inferiors
            .thread_and_process_mut(ptid)
            .ok_or(InferiorError::UnknownThread(ptid))?;
        let table = &mut process.breakpoints;
        table.check_breakpoints(target, pc);
        if let Err(err) = table.delete_reinsert_breakpoints(target, ptid) {
            tracing::warn!("failed to delete step breakpoints of {}: {}", ptid, err);
        }

        let mut report = true;
        let mut output = Vec::new();
        let mut watch = None;
        if kind == StopKind::Watchpoint {
            watch = target.stopped_data_address(ptid).map(|addr| {
                let kind = table
                    .find_watchpoint_at(addr)
                    .unwrap_or(PointKind::WriteWatch);
                (kind, addr)
            });
        } else if !stepping {
            if table.gdb_breakpoint_here(pc) {
                if let Some(regcache) = thread.regcache() {
                    if table.evaluate_conditions(target, regcache, pc) {
                        output = table.run_commands(target, regcache, pc);
                        // Breakpoints with commands only print.
                        report = table.gdb_no_commands_at(pc);
                    } else {
                        tracing::debug!("condition at {:#x} is false", pc);
                        report = false;
                    }
                }
            } else if table.breakpoint_here(pc) {
                report = false;
            }
        }

        for line in output {
            self.console_output(&line).await?;
        }
        if !report {
            return self.swallow(ptid, None).await;
        }

        let reason = match kind {
            StopKind::SwBreakpoint if self.report_swbreak => Some(StopReason::SwBreak),
            StopKind::HwBreakpoint if self.report_hwbreak => Some(StopReason::HwBreak),
            StopKind::Watchpoint => watch.map(|(kind, addr)| StopReason::Watch(kind, addr)),
            _ => None,
        };
        Ok(Some(self.stopped_reply(ptid, GDB_SIGTRAP, reason)))
    }

    /// Forward text printed by breakpoint commands.
    async fn console_output(&mut self, text: &str) -> Result<(), Error> {
        if !self.connected || self.non_stop {
            tracing::info!("{}", text.trim_end());
            return Ok(());
        }
        let mut writer = self.writer();
        writer.put_str("O");
        writer.put_hex_encoded(text.as_bytes());
        self.conn.send_packet(&writer.finish()).await
    }

    /// Tell the debugger about a stop.
    async fn report(&mut self, reply: StopReply) -> Result<(), Error> {
        if let StopReply::Stopped { ptid, signal, .. } = &reply {
            if let Some(thread) = self.inferiors.find_thread_mut(*ptid) {
                thread.last_signal = *signal;
            }
        }
        let payload = self.encode(&reply);

        if !self.connected {
            self.waiting = false;
            tracing::info!("stop without a debugger: {}", String::from_utf8_lossy(&payload));
        } else if self.non_stop {
            let ptid = reply.ptid().unwrap_or_else(|| Ptid::new(0, 0));
            let idle = self.inferiors.queued_stops() == 0;
            self.inferiors.queue_stop(ptid, payload.clone());
            if idle {
                let mut notification = BytesMut::from(&b"Stop:"[..]);
                notification.extend_from_slice(&payload);
                self.conn.send_notification(&notification).await?;
            }
        } else {
            self.waiting = false;
            if let Some(ptid) = reply.ptid() {
                if self.inferiors.find_thread(ptid).is_some() {
                    self.inferiors.set_current(ptid)?;
                }
            }
            self.conn.send_packet(&payload).await?;
        }
        self.last_reply = Some(reply);
        Ok(())
    }

    fn remove_process(&mut self, pid: Pid) {
        let threads: Vec<Ptid> = self.inferiors.threads_of(pid).map(|t| t.ptid).collect();
        for ptid in threads {
            self.inferiors.remove_thread(ptid, &mut self.target);
        }
        self.target.select_process(pid);
        if let Err(err) = self.inferiors.remove_process(pid, &mut self.target) {
            tracing::warn!("failed to remove process {}: {}", pid, err);
        }
    }

    fn kill_process(&mut self, pid: Pid) {
        if let Err(err) = self.target.kill(pid) {
            tracing::warn!("failed to kill {}: {}", pid, err);
        }
        self.remove_process(pid);
    }

    fn kill_all(&mut self) {
        let pids: Vec<Pid> = self.inferiors.processes().map(|p| p.pid).collect();
        for pid in pids {
            self.kill_process(pid);
        }
    }

    async fn detach(&mut self, pid: Option<Pid>) -> Result<Reply, Error> {
        let pids: Vec<Pid> = match pid {
            Some(pid) if self.inferiors.find_process(pid).is_some() => vec![pid],
            Some(_) => return Ok(Reply::Packet(Bytes::from_static(b"E01"))),
            None => self.inferiors.processes().map(|p| p.pid).collect(),
        };

        let persistent = pids.iter().any(|pid| {
            self.inferiors
                .find_process(*pid)
                .map_or(false, |p| p.breakpoints.any_persistent_commands())
        });
        if persistent {
            tracing::info!("detaching the debugger, persistent breakpoint commands keep running");
            self.conn.send_packet(b"OK").await?;
            self.connected = false;
            self.waiting = false;
            match self
                .resume(&[(ResumeAction::Continue(None), ThreadId::all())])
                .await
            {
                Ok(()) | Err(Error::NothingToResume) => {}
                Err(err) => return Err(err),
            }
            self.serve_detached().await?;
            return Ok(Reply::Exit);
        }

        for pid in pids {
            tracing::info!("detaching from {}", pid);
            // Take our patches out before the process runs on its own.
            self.remove_process(pid);
            if let Err(err) = self.target.detach(pid) {
                tracing::warn!("failed to detach from {}: {}", pid, err);
            }
        }
        if self.inferiors.is_empty() {
            self.conn.send_packet(b"OK").await?;
            return Ok(Reply::Exit);
        }
        Ok(Reply::ok())
    }

    /// Keep the inferiors going without a debugger until they are all gone,
    /// running breakpoint commands as they are hit.
    async fn serve_detached(&mut self) -> Result<(), Error> {
        while !self.inferiors.is_empty() {
            let event = match self.pending_events.pop_front() {
                Some(event) => event,
                None => self
                    .events
                    .recv()
                    .await
                    .ok_or(Error::GdbServerStopEventRecvError)?,
            };
            let reply = match self.handle_stop(event).await? {
                Some(reply) => reply,
                None => continue,
            };
            self.report(reply.clone()).await?;
            if let StopReply::Stopped { ptid, signal, .. } = reply {
                let action = ResumeAction::Continue(match signal {
                    0 | GDB_SIGTRAP => None,
                    n => from_gdb_signal(n),
                });
                if self.inferiors.find_thread(ptid).is_some() {
                    self.resume(&[(action, ThreadId::from(ptid))]).await?;
                }
            }
        }
        tracing::info!("every inferior is gone");
        Ok(())
    }
}

/// Packets handled even while the inferior runs in all-stop mode.
fn serves_while_running(packet: &[u8]) -> bool {
    packet.first() == Some(&b'm')
}
