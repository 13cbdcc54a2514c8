/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Wire framing of the remote serial protocol, shared by the stub and the
//! client. A frame is `$<body>#<two hex digit checksum>`, where the checksum
//! is the sum of the body bytes modulo 256. Acks (`+`), nacks (`-`) and
//! interrupts (`0x03`) are single bytes outside of any frame.

use std::io;

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::logger::PacketLogger;
use crate::packet::checksum;
use crate::packet::decode_frame;
use crate::packet::Packet;
use crate::packet::PacketParseError;
use crate::packet::Request;
use crate::response::ResponseWriter;

const PACKET_BUFFER_CAPACITY: usize = 0x8000;

/// Result of reading one frame.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Packet(Packet),
    /// A frame was read but failed validation. The peer should be NACKed.
    Rejected(PacketParseError),
    /// The peer closed the connection.
    EndOfStream,
}

pub struct PacketReader<R> {
    reader: R,
    buf: BytesMut,
    role: String,
    sequence_ids: bool,
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new<S: Into<String>>(reader: R, role: S) -> Self {
        PacketReader {
            reader,
            buf: BytesMut::with_capacity(PACKET_BUFFER_CAPACITY),
            role: role.into(),
            sequence_ids: false,
        }
    }

    /// Accept the obsolete `xx:` sequence-id prefix on incoming requests.
    pub fn accept_sequence_ids(&mut self, enable: bool) -> &mut Self {
        self.sequence_ids = enable;
        self
    }

    /// Reads exactly one frame. Bytes following it stay buffered for the
    /// next call.
    pub async fn read_packet(&mut self) -> Result<Frame, Error> {
        loop {
            if let Some(frame) = self.try_parse() {
                return Ok(frame);
            }

            match self.reader.read_buf(&mut self.buf).await {
                Ok(0) => {
                    if !self.buf.is_empty() {
                        tracing::warn!(
                            "[{}] peer closed with {} bytes of incomplete frame",
                            self.role,
                            self.buf.len()
                        );
                    }
                    return Ok(Frame::EndOfStream);
                }
                Ok(_) => {}
                Err(err) if is_disconnect(&err) => return Ok(Frame::EndOfStream),
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    fn try_parse(&mut self) -> Option<Frame> {
        // Skip line noise between frames.
        let start = self
            .buf
            .iter()
            .position(|b| matches!(b, b'+' | b'-' | 0x03 | b'$'))
            .unwrap_or(self.buf.len());
        if start > 0 {
            tracing::debug!("[{}] skipping {} stray bytes", self.role, start);
            self.buf.advance(start);
        }

        let header = *self.buf.first()?;
        let packet = match header {
            b'+' => Packet::Ack,
            b'-' => Packet::Nack,
            0x03 => Packet::Interrupt,
            _ => return self.try_parse_frame(),
        };
        self.buf.advance(1);
        Some(Frame::Packet(packet))
    }

    fn try_parse_frame(&mut self) -> Option<Frame> {
        let end_of_body = self.buf.iter().position(|b| *b == b'#');
        if end_of_body.unwrap_or(self.buf.len()) > PACKET_BUFFER_CAPACITY {
            // Drop the runaway frame, up to where the next one might start.
            let next = self
                .buf
                .iter()
                .skip(1)
                .position(|b| *b == b'$')
                .map_or(self.buf.len(), |i| i + 1);
            self.buf.advance(next);
            tracing::warn!("[{}] dropped {} bytes of an oversized frame", self.role, next);
            return Some(Frame::Rejected(PacketParseError::FrameTooLong));
        }
        let end_of_body = end_of_body?;
        if self.buf.len() < end_of_body + 3 {
            return None;
        }

        let frame = self.buf.split_to(end_of_body + 3);
        Some(match decode_frame(&frame) {
            Ok(body) => {
                tracing::trace!(
                    "{:?}",
                    PacketLogger::incoming(&self.role, body, checksum(body))
                );
                let body = Bytes::copy_from_slice(body);
                let request = if self.sequence_ids {
                    Request::with_sequence_id(body)
                } else {
                    Request::new(body)
                };
                Frame::Packet(Packet::Command(request))
            }
            Err(err) => {
                tracing::warn!("[{}] rejected frame: {}", self.role, err);
                Frame::Rejected(err)
            }
        })
    }
}

pub struct PacketWriter<W> {
    writer: W,
    role: String,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new<S: Into<String>>(writer: W, role: S) -> Self {
        PacketWriter {
            writer,
            role: role.into(),
        }
    }

    /// Frames `payload` and writes it in one go.
    pub async fn write_packet(&mut self, payload: &[u8]) -> Result<(), Error> {
        let frame = self.frame(false, None, payload)?;
        self.write_raw(&frame).await
    }

    /// Builds the bytes of a reply frame, optionally prefixed by `+`.
    pub fn frame(&self, ack: bool, seq: Option<u8>, payload: &[u8]) -> Result<Bytes, Error> {
        let mut writer = ResponseWriter::new(ack);
        if let Some(seq) = seq {
            writer.put_sequence_id(seq);
        }
        writer.put_slice(payload)?;
        Ok(writer.finish(&self.role))
    }

    pub async fn write_ack(&mut self) -> Result<(), Error> {
        self.write_raw(b"+").await
    }

    pub async fn write_nack(&mut self) -> Result<(), Error> {
        self.write_raw(b"-").await
    }

    pub async fn write_interrupt(&mut self) -> Result<(), Error> {
        self.write_raw(&[0x03]).await
    }

    /// Half-closes the stream, the peer reads end-of-stream.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.writer.write_all(bytes).await.map_err(|err| {
            if is_disconnect(&err) {
                Error::ConnReset
            } else {
                Error::Io(err)
            }
        })?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tokio::io::duplex;

    use super::*;

    fn command(body: &str) -> Frame {
        Frame::Packet(Packet::Command(Request::new(body.to_owned())))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reads_one_frame_per_call() {
        let (client, server) = duplex(256);
        let mut writer = PacketWriter::new(client, "client");
        let mut reader = PacketReader::new(server, "stub");

        writer
            .write_raw(b"+$qC#b4$vAttach;1#37\x03-")
            .await
            .unwrap();
        drop(writer);

        assert_eq!(reader.read_packet().await.unwrap(), Frame::Packet(Packet::Ack));
        assert_eq!(reader.read_packet().await.unwrap(), command("qC"));
        assert_eq!(reader.read_packet().await.unwrap(), command("vAttach;1"));
        assert_eq!(
            reader.read_packet().await.unwrap(),
            Frame::Packet(Packet::Interrupt)
        );
        assert_eq!(reader.read_packet().await.unwrap(), Frame::Packet(Packet::Nack));
        assert_eq!(reader.read_packet().await.unwrap(), Frame::EndOfStream);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reassembles_partial_frames() {
        let (mut client, server) = duplex(256);
        let mut reader = PacketReader::new(server, "stub");

        let read = tokio::spawn(async move { reader.read_packet().await });
        client.write_all(b"$q").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"C#b").await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(b"4").await.unwrap();

        assert_eq!(read.await.unwrap().unwrap(), command("qC"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn rejects_bad_checksum_and_continues() {
        let (mut client, server) = duplex(256);
        let mut reader = PacketReader::new(server, "stub");

        client.write_all(b"$qC#00$qC#b4").await.unwrap();
        drop(client);

        assert_eq!(
            reader.read_packet().await.unwrap(),
            Frame::Rejected(PacketParseError::ChecksumMismatched {
                checksum: 0,
                calculated: 0xb4
            })
        );
        assert_eq!(reader.read_packet().await.unwrap(), command("qC"));
        assert_eq!(reader.read_packet().await.unwrap(), Frame::EndOfStream);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn written_payload_reads_back_identically() {
        let (client, server) = duplex(1024);
        let mut writer = PacketWriter::new(client, "stub");
        let mut reader = PacketReader::new(server, "client");

        let payloads: &[&[u8]] = &[b"pid:95117;name:666f6f;", b"", b"OK", b"E04", b"\x7d\x8a"];
        for payload in payloads {
            writer.write_packet(payload).await.unwrap();
        }
        for payload in payloads {
            match reader.read_packet().await.unwrap() {
                Frame::Packet(Packet::Command(req)) => assert_eq!(req.body(), *payload),
                other => panic!("unexpected frame {:?}", other),
            }
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn oversized_frame_is_rejected_and_dropped() {
        let (mut client, server) = duplex(1024);
        let mut reader = PacketReader::new(server, "stub");

        let writer = tokio::spawn(async move {
            let mut input = vec![b'$'];
            input.resize(PACKET_BUFFER_CAPACITY + 2, b'a');
            input.extend_from_slice(b"$qC#b4");
            client.write_all(&input).await.unwrap();
        });

        assert_eq!(
            reader.read_packet().await.unwrap(),
            Frame::Rejected(PacketParseError::FrameTooLong)
        );
        assert_eq!(reader.read_packet().await.unwrap(), command("qC"));
        writer.await.unwrap();
        assert_eq!(reader.read_packet().await.unwrap(), Frame::EndOfStream);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn incomplete_frame_at_eof_is_end_of_stream() {
        let (mut client, server) = duplex(64);
        let mut reader = PacketReader::new(server, "stub");
        client.write_all(b"$qC#b").await.unwrap();
        drop(client);
        assert_eq!(reader.read_packet().await.unwrap(), Frame::EndOfStream);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn strips_sequence_ids_when_enabled() {
        let (mut client, server) = duplex(64);
        let mut reader = PacketReader::new(server, "stub");
        reader.accept_sequence_ids(true);
        // "01:qC" = 0x30 + 0x31 + 0x3a + 0x71 + 0x43
        client.write_all(b"$01:qC#4f").await.unwrap();
        match reader.read_packet().await.unwrap() {
            Frame::Packet(Packet::Command(req)) => {
                assert_eq!(req.sequence_id(), Some(1));
                assert_eq!(req.body(), b"qC");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
