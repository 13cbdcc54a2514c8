/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;

use crate::error::Error;
use crate::hex::encode_hex_string;
use crate::logger::PacketLogger;

/// Builds one outgoing frame: optional `+` ack, `$`, body, `#` and checksum.
#[derive(PartialEq, Eq, Debug)]
pub struct ResponseWriter {
    started: bool,
    checksum: u8,
    buf: BytesMut,
}

impl ResponseWriter {
    /// Creates a new ResponseWriter. `ack` prefixes the frame with `+`,
    /// acknowledging the request being answered.
    pub fn new(ack: bool) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        if ack {
            buf.put_u8(b'+');
        }
        Self {
            started: false,
            checksum: 0,
            buf,
        }
    }

    fn put_u8(&mut self, byte: u8) {
        if !self.started {
            self.started = true;
            self.buf.put_u8(b'$');
        }

        self.checksum = self.checksum.wrapping_add(byte);
        self.buf.put_u8(byte);
    }

    /// Echo a sequence id, used only when the request carried one.
    pub fn put_sequence_id(&mut self, seq: u8) {
        self.put_str(&encode_hex_string(&[seq]));
        self.put_u8(b':');
    }

    /// Write a slice verbatim. `$` and `#` can never appear in a frame body.
    pub fn put_slice(&mut self, s: &[u8]) -> Result<(), Error> {
        if s.iter().any(|b| *b == b'$' || *b == b'#') {
            return Err(Error::UnframeablePayload(
                String::from_utf8_lossy(s).into_owned(),
            ));
        }
        s.iter().for_each(|c| self.put_u8(*c));
        Ok(())
    }

    fn put_str(&mut self, s: &str) {
        s.bytes().for_each(|c| self.put_u8(c))
    }

    /// Consumes self, writing out the final `#` and checksum.
    pub fn finish(mut self, role: &str) -> Bytes {
        let checksum = self.checksum;

        // empty response
        if !self.started {
            self.started = true;
            self.buf.put_u8(b'$');
        }

        let body_start = self.buf.iter().position(|b| *b == b'$').map_or(0, |i| i + 1);
        tracing::trace!(
            "{:?}",
            PacketLogger::outgoing(role, &self.buf[body_start..], checksum)
        );

        self.buf.put_u8(b'#');
        self.buf.put_slice(encode_hex_string(&[checksum]).as_bytes());
        self.buf.freeze()
    }
}
