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

//! Packet grammar: one parser per command under `base/`, tied together by
//! the `commands!` table.

#![allow(non_snake_case, non_camel_case_types)]

use bytes::Bytes;
use bytes::BytesMut;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use paste::paste;
use thiserror::Error;

use crate::hex::*;
use crate::response::*;
use crate::stop::from_gdb_signal;

mod base;

pub use base::*;

trait ParseCommand: Sized {
    fn parse(buff: BytesMut) -> Option<Self>;
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum IdKind {
    // all threads: `-1'.
    All,
    // any thread: `0'.
    Any,
    Id(Pid),
}

impl IdKind {
    pub fn from_raw(pid: i32) -> Self {
        match pid {
            -1 => IdKind::All,
            0 => IdKind::Any,
            _ => IdKind::Id(Pid::from_raw(pid)),
        }
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn into_raw(&self) -> i32 {
        match self {
            IdKind::All => -1,
            IdKind::Any => 0,
            IdKind::Id(pid) => pid.as_raw(),
        }
    }

    /// Parse `-1`, `0` or a positive hex id.
    fn decode(bytes: &[u8]) -> Option<Self> {
        let id = decode_signed_hex(bytes).ok()?;
        if id < -1 {
            return None;
        }
        i32::try_from(id).ok().map(IdKind::from_raw)
    }

    pub fn matches(&self, other: &IdKind) -> bool {
        match (self, &other) {
            (IdKind::All, _) => true,
            (IdKind::Any, _) => true,
            (IdKind::Id(pid1), IdKind::Id(pid2)) => pid1 == pid2,
            (IdKind::Id(_), _) => other.matches(self),
        }
    }
}

impl WriteResponse for IdKind {
    fn write_response(&self, writer: &mut ResponseWriter) {
        match self {
            IdKind::All => writer.put_str("-1"),
            IdKind::Any => writer.put_str("0"),
            IdKind::Id(pid) => writer.put_num(pid.as_raw()),
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum ThreadOp {
    c, // step and continue, deprecated because of `vCont'
    g, // Other operations
    G,
    m,
    M,
}

/// Gdb ThreadId. See https://sourceware.org/gdb/onlinedocs/gdb/Packets.html#thread_002did-syntax
/// for more details.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ThreadId {
    pub pid: IdKind,
    pub tid: IdKind,
}

impl ThreadId {
    pub fn all() -> Self {
        ThreadId {
            tid: IdKind::All,
            pid: IdKind::All,
        }
    }

    pub fn any() -> Self {
        ThreadId {
            tid: IdKind::Any,
            pid: IdKind::Any,
        }
    }

    pub fn pid(pid: i32) -> Self {
        ThreadId {
            tid: IdKind::All,
            pid: IdKind::from_raw(pid),
        }
    }

    pub fn pid_tid(pid: i32, tid: i32) -> Self {
        ThreadId {
            pid: IdKind::from_raw(pid),
            tid: IdKind::from_raw(tid),
        }
    }

    // NB: Specifying just a process, as ‘ppid’, is equivalent to ‘ppid.-1’.
    // Without the `p' prefix only a thread is named, in any process.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        match bytes.split_first() {
            Some((b'p', rest)) => {
                let mut iter = rest.split(|c| *c == b'.');
                let pid = iter.next().and_then(IdKind::decode)?;
                let tid = match iter.next() {
                    Some(tid) => IdKind::decode(tid)?,
                    None => IdKind::All,
                };
                Some(ThreadId { pid, tid })
            }
            _ => {
                let tid = IdKind::decode(bytes)?;
                let pid = if tid == IdKind::All {
                    IdKind::All
                } else {
                    IdKind::Any
                };
                Some(ThreadId { pid, tid })
            }
        }
    }

    /// Check if `tid` matches `ThreadId`.
    pub fn matches(&self, other: &ThreadId) -> bool {
        self.pid.matches(&other.pid) && self.tid.matches(&other.tid)
    }

    pub fn getpid(&self) -> Option<Pid> {
        let id = self.pid.into_raw();
        if id > 0 { Some(Pid::from_raw(id)) } else { None }
    }

    pub fn gettid(&self) -> Option<Pid> {
        let id = self.tid.into_raw();
        if id > 0 { Some(Pid::from_raw(id)) } else { None }
    }
}

impl WriteResponse for ThreadId {
    fn write_response(&self, writer: &mut ResponseWriter) {
        if writer.multiprocess() {
            writer.put_str("p");
            self.pid.write_response(writer);
            writer.put_str(".");
        }
        self.tid.write_response(writer);
    }
}

macro_rules! commands {
    (
        $(#[$attrs:meta])*
        $vis:vis enum $Name:ident {
            $(
                $(#[$ext_attrs:meta])*
                $ext:ident {
                    $($name:literal => $command:ident,)*
                }
            )*
        }
    ) => {paste! {
        $(
            #[allow(non_camel_case_types)]
            #[derive(PartialEq, Debug)]
            $(#[$ext_attrs])*
            $vis enum [<$ext:camel>] {
                $($command(self::$ext::$command),)*
            }
        )*

        /// GDB commands
        $(#[$attrs])*
        $vis enum $Name {
            $(
                [<$ext:camel>]([<$ext:camel>]),
            )*
            Unknown(Bytes),
        }

        impl Command {
            pub fn try_parse(
                mut buf: BytesMut
            ) -> Result<Command, CommandParseError> {
                if buf.is_empty() {
                    return Err(CommandParseError::Empty);
                }

                let body = buf.as_ref();

                $(
                    match body {
                        $(_ if body.starts_with($name.as_bytes()) => {
                            let nb = $name.as_bytes().len();
                            let cmd = self::$ext::$command::parse(buf.split_off(nb))
                                .ok_or(CommandParseError::MalformedCommand(String::from(concat!($name))))?;

                            return Ok(
                                Command::[<$ext:camel>](
                                    [<$ext:camel>]::$command(cmd)
                                )
                            )
                        })*
                        _ => {},
                    }
                )*

                Ok(Command::Unknown(buf.freeze()))
            }
        }
    }};
}

/// Command parse error
#[derive(Debug, PartialEq, Eq, Clone, Error)]
pub enum CommandParseError {
    /// Command is empty
    #[error("Command is empty")]
    Empty,

    /// Malformed command
    #[error("Malformed command: {}", .0)]
    MalformedCommand(String),
}

// Prefixes are tried in order, so a command must come after every other
// command it is a prefix of.
commands! {
    #[derive(PartialEq, Debug)]
    pub enum Command {
        base {
            "?" => QuestionMark,
            "c" => c,
            "s" => s,
            "D" => D,
            "g" => g,
            "G" => G,
            "H" => H,
            "k" => k,
            "m" => m,
            "M" => M,
            "p" => p,
            "P" => P,
            "qAttached" => qAttached,
            "qC" => qC,
            "qfThreadInfo" => qfThreadInfo,
            "qsThreadInfo" => qsThreadInfo,
            "qSupported" => qSupported,
            "QStartNoAckMode" => QStartNoAckMode,
            "QNonStop" => QNonStop,
            "QThreadEvents" => QThreadEvents,
            "qSymbol" => qSymbol,
            "qXfer" => qXfer,
            "T" => T,
            "vCont" => vCont,
            "vKill" => vKill,
            "vStopped" => vStopped,
            "X" => X,
            "z" => z,
            "Z" => Z,
        }
    }
}

/// Resume actions set by vCont.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ResumeAction {
    /// signal step, with optional signal.
    Step(Option<Signal>),
    /// cointinue, with optional signal.
    Continue(Option<Signal>),
    /// Stop the thread, reported as a stop with signal 0.
    Stop,
    /// Keep stepping until rip doesn't belong to start..=end.
    StepUntil(u64, u64),
}

impl ResumeAction {
    pub fn is_step(&self) -> bool {
        matches!(self, ResumeAction::Step(_) | ResumeAction::StepUntil(..))
    }
}

/// Parse a signal given in gdb's numbering.
fn decode_signal(bytes: &[u8]) -> Option<Signal> {
    decode_hex::<u8>(bytes).ok().and_then(from_gdb_signal)
}
