/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::Bytes;

use crate::error::Error;
use crate::framer::Frame;
use crate::framer::PacketReader;
use crate::framer::PacketWriter;
use crate::hex::decode_hex;
use crate::packet::Packet;
use crate::transport::BoxReader;
use crate::transport::BoxWriter;
use crate::transport::ConnectUrl;
use crate::transport::Connection;

/// How many times a request is resent, or a corrupted reply re-requested,
/// before giving up.
const MAX_RETRIES: usize = 3;

/// If `reply` is an `Exx` error packet, returns `xx`.
pub fn error_code(reply: &[u8]) -> Option<u8> {
    match reply {
        [b'E', digits @ ..] if digits.len() == 2 => decode_hex(digits).ok(),
        _ => None,
    }
}

/// Minimal client side of the protocol: one request, one reply.
pub struct RemoteClient {
    url: ConnectUrl,
    reader: PacketReader<BoxReader>,
    writer: PacketWriter<BoxWriter>,
    no_ack_mode: bool,
}

impl RemoteClient {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        Self::connect_url(url.parse()?).await
    }

    pub async fn connect_url(url: ConnectUrl) -> Result<Self, Error> {
        let conn = Connection::connect(&url).await?;
        tracing::debug!("connected to {}", url);
        Ok(RemoteClient {
            reader: PacketReader::new(conn.reader, "client"),
            writer: PacketWriter::new(conn.writer, "client"),
            url,
            no_ack_mode: false,
        })
    }

    pub fn url(&self) -> &ConnectUrl {
        &self.url
    }

    pub fn no_ack_mode(&self) -> bool {
        self.no_ack_mode
    }

    /// Sends `payload` and waits for the reply body.
    pub async fn send(&mut self, payload: &[u8]) -> Result<Bytes, Error> {
        let frame = self.writer.frame(false, None, payload)?;
        self.writer.write_raw(&frame).await?;
        self.read_reply(Some(&frame)).await
    }

    /// Sends an interrupt (`0x03`) and waits for the stop reply.
    pub async fn interrupt(&mut self) -> Result<Bytes, Error> {
        self.writer.write_interrupt().await?;
        self.read_reply(None).await
    }

    /// `sent` is resent when the server NACKs it.
    async fn read_reply(&mut self, sent: Option<&Bytes>) -> Result<Bytes, Error> {
        let mut retries = 0;
        loop {
            match self.reader.read_packet().await? {
                Frame::EndOfStream => return Err(Error::ConnReset),
                Frame::Packet(Packet::Ack) | Frame::Packet(Packet::Interrupt) => {}
                Frame::Packet(Packet::Nack) => {
                    retries += 1;
                    if retries > MAX_RETRIES {
                        return Err(Error::ConnReset);
                    }
                    if let Some(sent) = sent {
                        self.writer.write_raw(sent).await?;
                    }
                }
                Frame::Rejected(err) => {
                    retries += 1;
                    if self.no_ack_mode || retries > MAX_RETRIES {
                        return Err(err.into());
                    }
                    self.writer.write_nack().await?;
                }
                Frame::Packet(Packet::Command(reply)) => {
                    if !self.no_ack_mode {
                        self.writer.write_ack().await?;
                    }
                    return Ok(Bytes::copy_from_slice(reply.body()));
                }
            }
        }
    }

    /// Like [`RemoteClient::send`], but turns `Exx` replies into errors.
    pub async fn request(&mut self, payload: &str) -> Result<String, Error> {
        let reply = self.send(payload.as_bytes()).await?;
        if let Some(code) = error_code(&reply) {
            return Err(Error::Remote(code));
        }
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Asks the server to stop acking. Returns false if it does not support
    /// it, in which case acks keep flowing.
    pub async fn start_no_ack_mode(&mut self) -> Result<bool, Error> {
        let reply = self.send(b"QStartNoAckMode").await?;
        self.no_ack_mode = &reply[..] == b"OK";
        Ok(self.no_ack_mode)
    }

    /// Closes our half of the connection.
    pub async fn disconnect(mut self) -> Result<(), Error> {
        self.writer.shutdown().await
    }
}
