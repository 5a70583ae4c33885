/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Acknowledgement discipline on top of the framing in `packet.rs`.
//!
//! A reader task turns the transport's bytes into [`Frame`]s and relays them
//! over a channel, so the session can wait for packets and stop events at
//! the same time.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::logger::PacketLogger;
use crate::packet::*;

const PACKET_BUFFER_CAPACITY: usize = 0x8000;

const FRAME_CHANNEL_CAPACITY: usize = 64;

/// What the client asked for.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    Packet(BytesMut),
    /// The interrupt byte (`^C`).
    Interrupt,
}

pub struct Connection {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    frames: mpsc::Receiver<Frame>,
    /// Frames that arrived while waiting for an acknowledgement.
    pending: VecDeque<Frame>,
    no_ack: bool,
}

impl Connection {
    /// Must be called from within a tokio runtime: the reader half is
    /// driven by a task of its own.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        tokio::spawn(relay_frames(reader, tx));
        Connection {
            writer: Box::new(writer),
            frames: rx,
            pending: VecDeque::new(),
            no_ack: false,
        }
    }

    pub fn no_ack(&self) -> bool {
        self.no_ack
    }

    pub fn set_no_ack(&mut self, no_ack: bool) {
        self.no_ack = no_ack;
    }

    /// Next frame from the client, or `None` once it went away. Nothing is
    /// lost when the returned future is dropped, so this can be raced
    /// against other events.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.pop_front() {
            return Some(frame);
        }
        self.frames.recv().await
    }

    /// Acknowledge a frame obtained from [`Self::next_frame`], returning
    /// what needs handling.
    pub async fn accept(&mut self, frame: Frame) -> Result<Option<Incoming>, Error> {
        match frame {
            Frame::Packet(payload) => {
                tracing::trace!("{:?}", PacketLogger::incoming(&payload, checksum(&payload)));
                if !self.no_ack {
                    self.write_all(b"+").await?;
                }
                Ok(Some(Incoming::Packet(payload)))
            }
            Frame::Corrupt { payload, error } => {
                if self.no_ack {
                    tracing::warn!("accepting corrupt packet, acks are off: {}", error);
                    Ok(Some(Incoming::Packet(payload)))
                } else {
                    tracing::warn!("corrupt packet, asking for retransmission: {}", error);
                    self.write_all(b"-").await?;
                    Ok(None)
                }
            }
            Frame::Interrupt => Ok(Some(Incoming::Interrupt)),
            Frame::Ack | Frame::Nack => {
                tracing::trace!("ignoring stray acknowledgement");
                Ok(None)
            }
        }
    }

    /// Wait for the next packet or interrupt.
    pub async fn recv_packet(&mut self) -> Result<Incoming, Error> {
        loop {
            let frame = self.next_frame().await.ok_or(Error::ConnReset)?;
            if let Some(incoming) = self.accept(frame).await? {
                return Ok(incoming);
            }
        }
    }

    /// Send one packet, retransmitting until the client acknowledges it.
    pub async fn send_packet(&mut self, payload: &[u8]) -> Result<(), Error> {
        let packet = encode_packet(payload, false)?;
        tracing::trace!(
            "{:?}",
            PacketLogger::outgoing(payload, checksum(&packet[1..packet.len() - 3]))
        );
        loop {
            self.write_all(&packet).await?;
            if self.no_ack || self.wait_for_ack().await? {
                return Ok(());
            }
            tracing::debug!("packet rejected by the client, retransmitting");
        }
    }

    /// Send an asynchronous notification. Notifications are never
    /// acknowledged.
    pub async fn send_notification(&mut self, payload: &[u8]) -> Result<(), Error> {
        let packet = encode_packet(payload, true)?;
        tracing::trace!(
            "{:?}",
            PacketLogger::notification(payload, checksum(&packet[1..packet.len() - 3]))
        );
        self.write_all(&packet).await
    }

    async fn wait_for_ack(&mut self) -> Result<bool, Error> {
        loop {
            match self.frames.recv().await.ok_or(Error::ConnReset)? {
                Frame::Ack => return Ok(true),
                Frame::Nack => return Ok(false),
                frame => self.pending.push_back(frame),
            }
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), Error> {
        self.writer
            .write_all(data)
            .await
            .map_err(|_| Error::ConnReset)?;
        self.writer.flush().await.map_err(|_| Error::ConnReset)
    }
}

async fn relay_frames<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Frame>) {
    let mut decoder = PacketDecoder::new();
    let mut rx_buf = BytesMut::with_capacity(PACKET_BUFFER_CAPACITY);
    loop {
        rx_buf.clear();
        match reader.read_buf(&mut rx_buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!("failed to read from the client: {}", err);
                break;
            }
        }
        decoder.feed(&rx_buf);
        while let Some(frame) = decoder.next_frame() {
            if tx.send(frame).await.is_err() {
                return;
            }
        }
    }
    tracing::info!("gdb client closed the connection");
}
