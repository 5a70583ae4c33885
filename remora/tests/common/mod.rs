/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A scripted gdb client talking to a stub over an in-memory pipe.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use remora::testing::FakeTarget;
use remora::Error;
use remora::GdbServer;
use remora::Ptid;
use remora::StopEvent;
use remora::StopKind;
use remora::StoppedInferior;
use remora::StubConfig;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

pub const PID: i32 = 100;
/// Where test programs keep their code.
pub const CODE: u64 = 0x1000;
/// `rip` in the amd64 register layout.
pub const RIP: usize = 16;

const TIMEOUT: Duration = Duration::from_secs(10);

pub fn main_thread() -> Ptid {
    Ptid::new(PID, PID)
}

enum Received {
    Ack,
    Nack,
    Packet(String),
    Notification(String),
}

pub struct Client {
    stream: DuplexStream,
    buf: Vec<u8>,
    packets: VecDeque<String>,
    notifications: VecDeque<String>,
    no_ack: bool,
}

fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |a, x| a.wrapping_add(*x))
}

fn expand(body: &[u8]) -> String {
    let mut out: Vec<u8> = Vec::new();
    let mut iter = body.iter();
    while let Some(&b) = iter.next() {
        if b == b'*' {
            let prev = *out.last().unwrap();
            let count = iter.next().unwrap() - 29;
            out.extend(std::iter::repeat(prev).take(count as usize));
        } else {
            out.push(b);
        }
    }
    String::from_utf8(out).unwrap()
}

impl Client {
    fn new(stream: DuplexStream) -> Self {
        Client {
            stream,
            buf: Vec::new(),
            packets: VecDeque::new(),
            notifications: VecDeque::new(),
            no_ack: false,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn read_frame(&mut self) -> Received {
        loop {
            if let Some(frame) = self.parse_frame() {
                return frame;
            }
            let mut chunk = [0u8; 4096];
            let n = tokio::time::timeout(TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for the stub")
                .unwrap();
            assert!(n > 0, "stub closed the connection");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn parse_frame(&mut self) -> Option<Received> {
        let first = *self.buf.first()?;
        match first {
            b'+' => {
                self.buf.remove(0);
                Some(Received::Ack)
            }
            b'-' => {
                self.buf.remove(0);
                Some(Received::Nack)
            }
            b'$' | b'%' => {
                let hash = self.buf.iter().position(|b| *b == b'#')?;
                if self.buf.len() < hash + 3 {
                    return None;
                }
                let frame: Vec<u8> = self.buf.drain(..hash + 3).collect();
                let body = &frame[1..hash];
                let cs = std::str::from_utf8(&frame[hash + 1..]).unwrap();
                assert_eq!(u8::from_str_radix(cs, 16).unwrap(), checksum(body));
                let body = expand(body);
                Some(if first == b'$' {
                    Received::Packet(body)
                } else {
                    Received::Notification(body)
                })
            }
            other => panic!("unexpected byte {:#04x} from the stub", other),
        }
    }

    /// Send a packet, waiting for its acknowledgement unless acks are off.
    pub async fn send(&mut self, payload: &str) {
        let packet = format!("${}#{:02x}", payload, checksum(payload.as_bytes()));
        self.send_raw(packet.as_bytes()).await;
        if self.no_ack {
            return;
        }
        loop {
            match self.read_frame().await {
                Received::Ack => return,
                Received::Nack => panic!("stub rejected {}", payload),
                Received::Packet(p) => self.packets.push_back(p),
                Received::Notification(n) => self.notifications.push_back(n),
            }
        }
    }

    /// The next reply packet, acknowledged.
    pub async fn recv(&mut self) -> String {
        if let Some(packet) = self.packets.pop_front() {
            return packet;
        }
        loop {
            match self.read_frame().await {
                Received::Packet(p) => {
                    if !self.no_ack {
                        self.send_raw(b"+").await;
                    }
                    return p;
                }
                Received::Notification(n) => self.notifications.push_back(n),
                Received::Ack | Received::Nack => {}
            }
        }
    }

    /// The next asynchronous notification.
    pub async fn notification(&mut self) -> String {
        if let Some(n) = self.notifications.pop_front() {
            return n;
        }
        loop {
            match self.read_frame().await {
                Received::Notification(n) => return n,
                Received::Packet(p) => {
                    if !self.no_ack {
                        self.send_raw(b"+").await;
                    }
                    self.packets.push_back(p);
                }
                Received::Ack | Received::Nack => {}
            }
        }
    }

    pub async fn request(&mut self, payload: &str) -> String {
        self.send(payload).await;
        self.recv().await
    }

    /// What gdb sends first, with every feature the stub knows about.
    pub async fn handshake(&mut self) -> String {
        self.request(
            "qSupported:multiprocess+;swbreak+;hwbreak+;fork-events+;vfork-events+;exec-events+;no-resumed+",
        )
        .await
    }

    pub async fn start_no_ack_mode(&mut self) {
        assert_eq!(self.request("QStartNoAckMode").await, "OK");
        self.no_ack = true;
    }

    pub async fn interrupt(&mut self) {
        self.send_raw(b"\x03").await;
    }
}

/// Encode agent bytecode in its `X<len>,<hex>` wire form.
pub fn agent_expr(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("X{:x},{}", bytes.len(), hex)
}

/// `printf "v=%d\n", 7` followed by `end`.
pub fn printf_seven() -> Vec<u8> {
    let mut bytes = vec![0x22, 0x07, 0x22, 0x00, 0x22, 0x00, 0x34, 0x01];
    let format = b"v=%d\n\0";
    bytes.extend_from_slice(&(format.len() as u16).to_be_bytes());
    bytes.extend_from_slice(format);
    bytes.extend_from_slice(&[0x22, 0x00, 0x27]);
    bytes
}

pub fn hex(text: &str) -> String {
    text.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// A fake process with a page of `nop`s at [`CODE`] and its threads stopped.
pub fn fake_target(threads: &[i32]) -> FakeTarget {
    remora::testing::init_tracing();
    let target = FakeTarget::new();
    target.poke(CODE, &[0x90; 0x100]);
    for tid in threads {
        target.set_register(Ptid::new(PID, *tid), RIP, CODE + 0x80);
    }
    target
}

pub fn inferior(threads: &[i32]) -> StoppedInferior {
    StoppedInferior {
        pid: nix::unistd::Pid::from_raw(PID),
        attached: false,
        threads: threads.iter().map(|t| nix::unistd::Pid::from_raw(*t)).collect(),
    }
}

/// Run a stub serving `threads` of [`PID`] against `script`, returning how
/// the session ended. The client disconnects when `script` returns.
pub async fn with_session<F, Fut>(
    config: StubConfig,
    target: &FakeTarget,
    threads: &[i32],
    script: F,
) -> Result<(), Error>
where
    F: FnOnce(Client, mpsc::Sender<StopEvent>) -> Fut,
    Fut: Future<Output = ()>,
{
    let (client_io, server_io) = tokio::io::duplex(0x10000);
    let (reader, writer) = tokio::io::split(server_io);
    let (tx, rx) = target.events(true);
    let server =
        GdbServer::from_stream(reader, writer, config).run(target.clone(), rx, inferior(threads));
    let client = script(Client::new(client_io), tx);
    let (result, ()) = tokio::join!(server, client);
    result
}

/// Park thread `tid` at `pc` and have it hit a software breakpoint.
pub async fn hit_breakpoint(
    target: &FakeTarget,
    events: &mpsc::Sender<StopEvent>,
    tid: i32,
    pc: u64,
) {
    let ptid = Ptid::new(PID, tid);
    target.set_register(ptid, RIP, pc);
    events
        .send(StopEvent::new(ptid, StopKind::SwBreakpoint))
        .await
        .unwrap();
}
