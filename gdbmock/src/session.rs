/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::dispatch::HandlerTable;
use crate::dispatch::Reply;
use crate::error::Error;
use crate::framer::Frame;
use crate::framer::PacketReader;
use crate::framer::PacketWriter;
use crate::packet::Packet;
use crate::packet::Request;
use crate::transport::BoxReader;
use crate::transport::BoxWriter;
use crate::transport::Connection;

/// States of a mock server's dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitForConnection,
    ReadPacket,
    Dispatch,
    WriteReply,
    Closed,
}

/// What happened during one session, returned when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Address of the client that was served, if one connected.
    pub peer: Option<String>,
    /// Requests dispatched, interrupts included.
    pub requests: usize,
    /// Frames NACKed for bad checksums or framing.
    pub rejected: usize,
    /// Bodies of requests no handler was scripted for, in arrival order.
    pub unhandled: Vec<String>,
}

/// Serves one connection: read a packet, dispatch it, write the reply,
/// repeat until the peer disconnects or a stop is requested.
pub struct Session {
    role: String,
    reader: PacketReader<BoxReader>,
    writer: PacketWriter<BoxWriter>,
    table: HandlerTable,
    /// No-ACK mode, set by the client with `QStartNoAckMode`.
    no_ack_mode: bool,
    /// Kept for retransmission when the client NACKs it.
    last_reply: Option<Bytes>,
    state: SessionState,
    summary: SessionSummary,
}

impl Session {
    pub fn new<S: Into<String>>(role: S, conn: Connection, table: HandlerTable) -> Self {
        let role = role.into();
        Session {
            reader: PacketReader::new(conn.reader, role.clone()),
            writer: PacketWriter::new(conn.writer, role.clone()),
            role,
            table,
            no_ack_mode: false,
            last_reply: None,
            state: SessionState::WaitForConnection,
            summary: SessionSummary {
                peer: Some(conn.peer),
                ..Default::default()
            },
        }
    }

    pub fn accept_sequence_ids(&mut self, enable: bool) -> &mut Self {
        self.reader.accept_sequence_ids(enable);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!("[{}] {:?} -> {:?}", self.role, self.state, next);
        self.state = next;
    }

    /// Runs until end-of-stream, or until `stop` fires (or its sender is
    /// dropped).
    pub async fn run(mut self, mut stop: oneshot::Receiver<()>) -> Result<SessionSummary, Error> {
        loop {
            self.transition(SessionState::ReadPacket);
            let frame = tokio::select! {
                frame = self.reader.read_packet() => frame?,
                _ = &mut stop => {
                    tracing::debug!("[{}] stop requested", self.role);
                    break;
                }
            };

            match frame {
                Frame::EndOfStream => {
                    tracing::debug!("[{}] client closed connection", self.role);
                    break;
                }
                Frame::Rejected(_) => {
                    self.summary.rejected += 1;
                    if !self.no_ack_mode {
                        self.writer.write_nack().await?;
                    }
                }
                Frame::Packet(Packet::Ack) => {}
                Frame::Packet(Packet::Nack) => {
                    if let Some(last) = self.last_reply.clone() {
                        tracing::debug!("[{}] retransmitting last reply", self.role);
                        self.writer.write_raw(&last).await?;
                    }
                }
                // Interrupts are out-of-band and never acked.
                Frame::Packet(Packet::Interrupt) => self.handle(Request::interrupt(), false).await?,
                Frame::Packet(Packet::Command(request)) => {
                    let ack = !self.no_ack_mode;
                    self.handle(request, ack).await?
                }
            }
        }

        self.transition(SessionState::Closed);
        Ok(self.summary)
    }

    fn reply_to(&mut self, request: &Request) -> Reply {
        if request.body() == b"QStartNoAckMode" {
            self.no_ack_mode = true;
            return Reply::ok();
        }
        match self.table.resolve(request) {
            Some((handler, payload)) => handler(payload),
            None => {
                let body = String::from_utf8_lossy(request.body()).into_owned();
                tracing::debug!("[{}] no handler for {:?}", self.role, body);
                self.summary.unhandled.push(body);
                self.table.fallback_reply().clone()
            }
        }
    }

    async fn handle(&mut self, request: Request, ack: bool) -> Result<(), Error> {
        self.transition(SessionState::Dispatch);
        self.summary.requests += 1;
        let reply = self.reply_to(&request);

        self.transition(SessionState::WriteReply);
        match reply.as_bytes() {
            Some(payload) => {
                let frame = self.writer.frame(ack, request.sequence_id(), payload)?;
                self.writer.write_raw(&frame).await?;
                self.last_reply = Some(if ack { frame.slice(1..) } else { frame });
            }
            None => {
                // A NACK must not resend the answer to an earlier request.
                self.last_reply = None;
                if ack {
                    self.writer.write_ack().await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tokio::io::duplex;
    use tokio::io::AsyncReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::io::DuplexStream;

    use super::*;

    fn session(table: HandlerTable) -> (Session, DuplexStream) {
        let (client, server) = duplex(1024);
        let (reader, writer) = tokio::io::split(server);
        let conn = Connection {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: "test".to_owned(),
        };
        (Session::new("stub", conn, table), client)
    }

    async fn exchange(table: HandlerTable, input: &[u8]) -> (Vec<u8>, SessionSummary) {
        let (session, mut client) = session(table);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(stop_rx));
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        let summary = task.await.unwrap().unwrap();
        let mut output = Vec::new();
        client.read_to_end(&mut output).await.unwrap();
        (output, summary)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn acks_and_replies() {
        let table = HandlerTable::new().reply("vAttach", "OK");
        let (output, summary) = exchange(table, b"$vAttach;1#37+").await;
        assert_eq!(output, b"+$OK#9a");
        assert_eq!(summary.requests, 1);
        assert!(summary.unhandled.is_empty());
        assert_eq!(summary.peer.as_deref(), Some("test"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unscripted_requests_get_fallback_and_loop_continues() {
        let table = HandlerTable::new().reply("vAttach", "OK");
        let (output, summary) = exchange(table, b"$qC#b4$vAttach;1#37").await;
        assert_eq!(output, b"+$#00+$OK#9a");
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.unhandled, vec!["qC".to_owned()]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bad_checksum_is_nacked() {
        let table = HandlerTable::new().reply("vAttach", "OK");
        let (output, summary) = exchange(table, b"$vAttach;1#00$vAttach;1#37").await;
        assert_eq!(output, b"-+$OK#9a");
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.requests, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_ack_mode_stops_acks() {
        let table = HandlerTable::new().reply("vAttach", "OK");
        let (output, _) = exchange(table, b"$QStartNoAckMode#b0+$vAttach;1#37").await;
        assert_eq!(output, b"+$OK#9a$OK#9a");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nack_retransmits_last_reply() {
        let table = HandlerTable::new().reply("vAttach", "OK");
        let (output, _) = exchange(table, b"$vAttach;1#37-").await;
        assert_eq!(output, b"+$OK#9a$OK#9a");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn no_reply_is_still_acked() {
        let table = HandlerTable::new().reply("k", Reply::NoReply);
        let (output, summary) = exchange(table, b"$k#6b").await;
        assert_eq!(output, b"+");
        assert_eq!(summary.requests, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn nack_after_silent_reply_resends_nothing() {
        let table = HandlerTable::new()
            .reply("qC", "QC2a")
            .reply("k", Reply::NoReply);
        let (output, _) = exchange(table, b"$qC#b4+$k#6b-").await;
        assert_eq!(output, b"+$QC2a#27+");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn interrupt_is_dispatched_without_ack() {
        let table = HandlerTable::new().reply(crate::packet::INTERRUPT_TOKEN, "T02");
        let (output, _) = exchange(table, b"\x03").await;
        // "T02" = 0x54 + 0x30 + 0x32
        assert_eq!(output, b"$T02#b6");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_ends_a_blocked_session() {
        let (session, _client) = session(HandlerTable::new());
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(stop_rx));
        stop_tx.send(()).unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.requests, 0);
    }
}
