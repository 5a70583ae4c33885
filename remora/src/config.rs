/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Largest packet the stub accepts, advertised through `qSupported`.
pub const DEFAULT_PACKET_SIZE: usize = 0x4000;

/// Stack slots available to agent expressions.
pub const DEFAULT_MAX_AGENT_STACK: usize = 100;

/// Knobs of a debugging session. Every field may be left out of a
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StubConfig {
    pub packet_size: usize,
    /// Offer `QStartNoAckMode`.
    pub allow_no_ack: bool,
    /// Offer `multiprocess+`. Thread ids use the `p<pid>.<tid>` form once
    /// the debugger agrees.
    pub multiprocess: bool,
    /// Offer `QNonStop`.
    pub non_stop: bool,
    /// Report thread creation and exit before the debugger asks for it with
    /// `QThreadEvents`.
    pub thread_events: bool,
    pub max_agent_stack: usize,
}

impl Default for StubConfig {
    fn default() -> Self {
        StubConfig {
            packet_size: DEFAULT_PACKET_SIZE,
            allow_no_ack: true,
            multiprocess: true,
            non_stop: true,
            thread_events: false,
            max_agent_stack: DEFAULT_MAX_AGENT_STACK,
        }
    }
}

/// Where the stub waits for the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdbConnection {
    /// The server shall bind to and listen on the given socket address.
    Addr(SocketAddr),

    /// The server shall bind to and listen on the given unix domain socket. This
    /// path must not exist, otherwise the bind will fail with `EADDRINUSE`.
    Path(PathBuf),
}

impl From<SocketAddr> for GdbConnection {
    fn from(addr: SocketAddr) -> Self {
        Self::Addr(addr)
    }
}

impl From<PathBuf> for GdbConnection {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<u16> for GdbConnection {
    fn from(port: u16) -> Self {
        Self::Addr(([127, 0, 0, 1], port).into())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = StubConfig::default();
        assert_eq!(config.packet_size, 0x4000);
        assert!(config.allow_no_ack);
        assert!(!config.thread_events);
        assert_eq!(
            GdbConnection::from(1234),
            GdbConnection::Addr("127.0.0.1:1234".parse().unwrap())
        );
    }
}
