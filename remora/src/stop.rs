/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Stop events reported by the back-end and the stop replies sent for them.
//! See section ["Stop Reply Packets"]
//! (https://sourceware.org/gdb/onlinedocs/gdb/Stop-Reply-Packets.html#Stop-Reply-Packets)
//! for the wire format.

use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use crate::commands::ThreadId;
use crate::inferiors::Ptid;
use crate::response::*;
use crate::target::PointKind;

/// Host signals and their numbers in gdb's own numbering, which is what
/// goes over the wire.
const GDB_SIGNALS: &[(Signal, u8)] = &[
    (Signal::SIGHUP, 1),
    (Signal::SIGINT, 2),
    (Signal::SIGQUIT, 3),
    (Signal::SIGILL, 4),
    (Signal::SIGTRAP, 5),
    (Signal::SIGABRT, 6),
    (Signal::SIGFPE, 8),
    (Signal::SIGKILL, 9),
    (Signal::SIGBUS, 10),
    (Signal::SIGSEGV, 11),
    (Signal::SIGSYS, 12),
    (Signal::SIGPIPE, 13),
    (Signal::SIGALRM, 14),
    (Signal::SIGTERM, 15),
    (Signal::SIGURG, 16),
    (Signal::SIGSTOP, 17),
    (Signal::SIGTSTP, 18),
    (Signal::SIGCONT, 19),
    (Signal::SIGCHLD, 20),
    (Signal::SIGTTIN, 21),
    (Signal::SIGTTOU, 22),
    (Signal::SIGIO, 23),
    (Signal::SIGXCPU, 24),
    (Signal::SIGXFSZ, 25),
    (Signal::SIGVTALRM, 26),
    (Signal::SIGPROF, 27),
    (Signal::SIGWINCH, 28),
    (Signal::SIGUSR1, 30),
    (Signal::SIGUSR2, 31),
    (Signal::SIGPWR, 32),
];

/// gdb's number for a host signal.
pub fn to_gdb_signal(sig: Signal) -> u8 {
    GDB_SIGNALS
        .iter()
        .find(|(s, _)| *s == sig)
        .map_or(sig as i32 as u8, |(_, n)| *n)
}

/// The host signal for gdb's signal number `n`.
pub fn from_gdb_signal(n: u8) -> Option<Signal> {
    GDB_SIGNALS.iter().find(|(_, g)| *g == n).map(|(s, _)| *s)
}

/// Something happened to a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopEvent {
    pub ptid: Ptid,
    pub kind: StopKind,
}

impl StopEvent {
    pub fn new(ptid: Ptid, kind: StopKind) -> Self {
        StopEvent { ptid, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopKind {
    /// Stopped by a signal meant for the inferior.
    Signal(Signal),
    /// Stopped on request (interrupt or `vCont;t`) without a signal.
    Stopped,
    /// Hit a software breakpoint. The pc already points back at the
    /// breakpoint address.
    SwBreakpoint,
    HwBreakpoint,
    /// A watchpoint triggered; the address comes from
    /// `Target::stopped_data_address`.
    Watchpoint,
    /// Finished a single step.
    SingleStep,
    SyscallEntry(u64),
    SyscallReturn(u64),
    /// `ptid` is a new thread.
    ThreadCreated,
    /// The thread forked; the payload is the child's first thread.
    Forked(Ptid),
    Vforked(Ptid),
    VforkDone,
    Exec(PathBuf),
    ThreadExited(i32),
    Exited(i32),
    Terminated(Signal),
    /// No thread is left running.
    NoResumed,
}

/// Extra `key:value` reason of a `T` stop reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Watch(PointKind, u64),
    SwBreak,
    HwBreak,
    SyscallEntry(u64),
    SyscallReturn(u64),
    Create,
    Fork(Ptid),
    Vfork(Ptid),
    VforkDone,
    Exec(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReply {
    Stopped {
        ptid: Ptid,
        /// gdb signal number.
        signal: u8,
        reason: Option<StopReason>,
        /// Expedited registers, by register number.
        regs: Vec<(usize, Vec<u8>)>,
    },
    Exited {
        pid: Pid,
        code: i32,
    },
    Terminated {
        pid: Pid,
        signal: u8,
    },
    ThreadExited {
        ptid: Ptid,
        code: i32,
    },
    NoResumed,
}

impl StopReply {
    /// The thread the reply is about. Process-wide replies use the
    /// process's main thread.
    pub fn ptid(&self) -> Option<Ptid> {
        match self {
            StopReply::Stopped { ptid, .. } | StopReply::ThreadExited { ptid, .. } => Some(*ptid),
            StopReply::Exited { pid, .. } | StopReply::Terminated { pid, .. } => {
                Some(Ptid { pid: *pid, tid: *pid })
            }
            StopReply::NoResumed => None,
        }
    }
}

impl WriteResponse for StopReason {
    fn write_response(&self, writer: &mut ResponseWriter) {
        match self {
            StopReason::Watch(kind, addr) => {
                writer.put_str(kind.watch_tag().unwrap_or("watch"));
                writer.put_str(":");
                writer.put_num(*addr);
            }
            StopReason::SwBreak => writer.put_str("swbreak:"),
            StopReason::HwBreak => writer.put_str("hwbreak:"),
            StopReason::SyscallEntry(nr) => {
                writer.put_str("syscall_entry:");
                writer.put_num(*nr);
            }
            StopReason::SyscallReturn(nr) => {
                writer.put_str("syscall_return:");
                writer.put_num(*nr);
            }
            StopReason::Create => writer.put_str("create:"),
            StopReason::Fork(child) => {
                writer.put_str("fork:");
                ThreadId::from(*child).write_response(writer);
            }
            StopReason::Vfork(child) => {
                writer.put_str("vfork:");
                ThreadId::from(*child).write_response(writer);
            }
            StopReason::VforkDone => writer.put_str("vforkdone:"),
            StopReason::Exec(path) => {
                // T05exec:2f746d702f6631;06:0000000000000000;07:80ddffffff7f0000;10:9030fdf7ff7f0000;thread:p350ad8.350ad8;
                writer.put_str("exec:");
                writer.put_hex_encoded(path.as_os_str().as_bytes());
            }
        }
        writer.put_str(";");
    }
}

impl WriteResponse for StopReply {
    fn write_response(&self, writer: &mut ResponseWriter) {
        match self {
            StopReply::Stopped {
                ptid,
                signal,
                reason,
                regs,
            } => {
                writer.put_str("T");
                writer.put_hex_encoded(&[*signal]);
                if let Some(reason) = reason {
                    reason.write_response(writer);
                }
                for (regno, regval) in regs {
                    writer.put_num(*regno);
                    writer.put_str(":");
                    writer.put_hex_encoded(regval);
                    writer.put_str(";");
                }
                writer.put_str("thread:");
                ThreadId::from(*ptid).write_response(writer);
                writer.put_str(";");
            }
            StopReply::Exited { pid, code } => {
                writer.put_str("W");
                writer.put_hex_encoded(&[*code as u8]);
                if writer.multiprocess() {
                    writer.put_str(";process:");
                    writer.put_num(pid.as_raw());
                }
            }
            StopReply::Terminated { pid, signal } => {
                writer.put_str("X");
                writer.put_hex_encoded(&[*signal]);
                if writer.multiprocess() {
                    writer.put_str(";process:");
                    writer.put_num(pid.as_raw());
                }
            }
            StopReply::ThreadExited { ptid, code } => {
                writer.put_str("w");
                writer.put_hex_encoded(&[*code as u8]);
                writer.put_str(";");
                ThreadId::from(*ptid).write_response(writer);
            }
            StopReply::NoResumed => writer.put_str("N"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    fn render(reply: &StopReply, multiprocess: bool) -> Bytes {
        let mut writer = ResponseWriter::new(multiprocess);
        reply.write_response(&mut writer);
        writer.finish()
    }

    #[test]
    fn signal_numbers() {
        assert_eq!(to_gdb_signal(Signal::SIGTRAP), 5);
        assert_eq!(to_gdb_signal(Signal::SIGUSR1), 30);
        assert_eq!(to_gdb_signal(Signal::SIGSTOP), 17);
        assert_eq!(from_gdb_signal(20), Some(Signal::SIGCHLD));
        assert_eq!(from_gdb_signal(0), None);
    }

    #[test]
    fn stopped_reply() {
        let reply = StopReply::Stopped {
            ptid: Ptid::new(0x21f994, 0x21f994),
            signal: 5,
            reason: Some(StopReason::Fork(Ptid::new(0x21feb6, 0x21feb6))),
            regs: vec![
                (6, vec![0x30, 0xdc, 0xff, 0xff, 0xff, 0x7f, 0, 0]),
                (0x10, vec![0x37, 0xc2, 0xec, 0xf7, 0xff, 0x7f, 0, 0]),
            ],
        };
        assert_eq!(
            render(&reply, true),
            Bytes::from_static(
                b"T05fork:p21feb6.21feb6;06:30dcffffff7f0000;10:37c2ecf7ff7f0000;thread:p21f994.21f994;"
            )
        );
    }

    #[test]
    fn stop_reasons() {
        let stopped = |reason| StopReply::Stopped {
            ptid: Ptid::new(7, 8),
            signal: 5,
            reason: Some(reason),
            regs: Vec::new(),
        };
        assert_eq!(
            render(&stopped(StopReason::Watch(PointKind::ReadWatch, 0x601040)), false),
            Bytes::from_static(b"T05rwatch:601040;thread:08;")
        );
        assert_eq!(
            render(&stopped(StopReason::SwBreak), true),
            Bytes::from_static(b"T05swbreak:;thread:p07.08;")
        );
        assert_eq!(
            render(&stopped(StopReason::Exec(PathBuf::from("/tmp/f1"))), true),
            Bytes::from_static(b"T05exec:2f746d702f6631;thread:p07.08;")
        );
    }

    #[test]
    fn exit_replies() {
        let pid = Pid::from_raw(0x42);
        assert_eq!(
            render(&StopReply::Exited { pid, code: 1 }, true),
            Bytes::from_static(b"W01;process:42")
        );
        assert_eq!(
            render(&StopReply::Exited { pid, code: 0 }, false),
            Bytes::from_static(b"W00")
        );
        assert_eq!(
            render(&StopReply::Terminated { pid, signal: 11 }, true),
            Bytes::from_static(b"X0b;process:42")
        );
        assert_eq!(
            render(
                &StopReply::ThreadExited {
                    ptid: Ptid::new(0x42, 0x43),
                    code: 0
                },
                true
            ),
            Bytes::from_static(b"w00;p42.43")
        );
        assert_eq!(render(&StopReply::NoResumed, true), Bytes::from_static(b"N"));
    }
}
