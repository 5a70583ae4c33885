/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use nix::unistd::Pid;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio::sync::mpsc;

use crate::config::GdbConnection;
use crate::config::StubConfig;
use crate::connection::Connection;
use crate::error::Error;
use crate::session::Session;
use crate::stop::StopEvent;
use crate::target::Target;

/// An inferior stopped and ready to be shown to the debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoppedInferior {
    pub pid: Pid,
    /// Attached to rather than spawned by us.
    pub attached: bool,
    /// Threads of the process; the first one becomes the current thread.
    pub threads: Vec<Pid>,
}

impl StoppedInferior {
    /// A single-threaded process we spawned.
    pub fn new(pid: Pid) -> Self {
        StoppedInferior {
            pid,
            attached: false,
            threads: vec![pid],
        }
    }
}

/// GdbServer controller
pub struct GdbServer {
    config: StubConfig,
    conn: Connection,
}

/// Binds to the given address and waits for an incoming connection.
async fn wait_for_tcp_connection(addr: SocketAddr) -> io::Result<TcpStream> {
    // NOTE: binding through `std` keeps tokio from spawning an extra worker
    // thread for the listener.
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let listener = TcpListener::from_std(listener)?;

    let (stream, client_addr) = listener.accept().await?;

    tracing::info!("Accepting client connection: {:?}", client_addr);

    Ok(stream)
}

/// Binds to the given socket path and waits for an incoming connection.
async fn wait_for_unix_connection(path: &Path) -> io::Result<UnixStream> {
    let listener = UnixListener::bind(path)?;

    let (stream, client_addr) = listener.accept().await?;

    tracing::info!("Accepting client connection: {:?}", client_addr);

    Ok(stream)
}

impl GdbServer {
    /// Waits for a debugger to connect to `addr`.
    ///
    /// NOTE: The canonical GDB server port is `1234`.
    pub async fn from_addr(addr: SocketAddr, config: StubConfig) -> Result<Self, Error> {
        let stream = wait_for_tcp_connection(addr)
            .await
            .map_err(|source| Error::WaitForGdbConnect { source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| Error::WaitForGdbConnect { source })?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_stream(reader, writer, config))
    }

    /// Waits for a debugger on the given unix domain socket. This is useful
    /// when we know there will only be one client and want to avoid binding
    /// to a port.
    pub async fn from_path(path: &Path, config: StubConfig) -> Result<Self, Error> {
        let stream = wait_for_unix_connection(path)
            .await
            .map_err(|source| Error::WaitForGdbConnect { source })?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_stream(reader, writer, config))
    }

    pub async fn from_connection(conn: &GdbConnection, config: StubConfig) -> Result<Self, Error> {
        match conn {
            GdbConnection::Addr(addr) => Self::from_addr(*addr, config).await,
            GdbConnection::Path(path) => Self::from_path(path, config).await,
        }
    }

    /// Serve a client already connected through `reader` and `writer`.
    pub fn from_stream<R, W>(reader: R, writer: W, config: StubConfig) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        GdbServer {
            config,
            conn: Connection::new(reader, writer),
        }
    }

    /// Debug `inferior` through `target` until the client disconnects,
    /// kills it, or detaches. Stop events of the target arrive on `events`.
    pub async fn run<T: Target>(
        self,
        target: T,
        events: mpsc::Receiver<StopEvent>,
        inferior: StoppedInferior,
    ) -> Result<(), Error> {
        let mut session = Session::new(self.config, self.conn, target, events);
        session.attach(inferior.pid, inferior.attached, &inferior.threads)?;
        let result = session.run().await;
        match &result {
            Ok(()) => tracing::info!("gdb session finished"),
            Err(err) => tracing::error!("gdb session failed: {}", err),
        }
        result
    }
}
