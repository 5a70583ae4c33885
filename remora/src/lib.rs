/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Architecture-independent core of a gdb remote serial protocol stub.
//!
//! The stub speaks the protocol over a [`Connection`], keeps track of the
//! debugged processes and threads, and owns every breakpoint the debugger
//! asked for: software breakpoints are patched into memory by the stub
//! itself and hidden from memory reads, conditions and `dprintf`-style
//! commands run as agent expressions on the stub side. Everything specific
//! to an OS or architecture sits behind the [`Target`] trait.
//!
//! A program embedding the stub waits for a debugger with [`GdbServer`],
//! then hands it a [`Target`], the receiving end of its stop events and
//! the first stopped inferior.

pub mod ax;
pub mod breakpoint;
pub mod commands;
mod config;
mod connection;
mod error;
mod hex;
pub mod inferiors;
mod logger;
mod packet;
mod regcache;
mod response;
mod server;
mod session;
mod slot_map;
mod stop;
mod target;
mod tdesc;
pub mod testing;

pub use config::GdbConnection;
pub use config::StubConfig;
pub use config::DEFAULT_MAX_AGENT_STACK;
pub use config::DEFAULT_PACKET_SIZE;
pub use connection::Connection;
pub use connection::Incoming;
pub use error::Error;
pub use hex::GdbHexError;
pub use inferiors::Ptid;
pub use packet::Frame;
pub use packet::PacketDecoder;
pub use packet::PacketParseError;
pub use regcache::RegCache;
pub use regcache::RegCacheError;
pub use regcache::RegisterStatus;
pub use response::ResponseWriter;
pub use response::WriteResponse;
pub use server::GdbServer;
pub use server::StoppedInferior;
pub use session::Session;
pub use slot_map::SlotKey;
pub use stop::StopEvent;
pub use stop::StopKind;
pub use stop::StopReason;
pub use stop::StopReply;
pub use target::PointKind;
pub use target::ResumeRequest;
pub use target::Target;
pub use target::TargetError;
pub use tdesc::ByteOrder;
pub use tdesc::RegisterDesc;
pub use tdesc::TargetDescription;
