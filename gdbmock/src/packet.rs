/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use bytes::Bytes;
use thiserror::Error;

use crate::hex::decode_hex;
use crate::hex::GdbHexError;

/// Token under which an interrupt (`0x03`) is dispatched.
pub const INTERRUPT_TOKEN: &str = "\x03";

/// Packet parse error.
#[derive(PartialEq, Eq, Debug, Clone, Error)]
pub enum PacketParseError {
    #[error("Checksum mismatch, expected: {checksum:02x}, got: {calculated:02x}")]
    ChecksumMismatched { checksum: u8, calculated: u8 },
    #[error("empty packet buffer")]
    EmptyBuf,
    #[error("missing checksum")]
    MissingChecksum,
    #[error("malformed checksum")]
    MalformedChecksum,
    #[error("frame exceeds the packet buffer")]
    FrameTooLong,
    #[error("unexpected header {0:#04x}")]
    UnexpectedHeader(u8),
    #[error(transparent)]
    DecodeHexError(GdbHexError),
}

impl From<GdbHexError> for PacketParseError {
    fn from(err: GdbHexError) -> Self {
        PacketParseError::DecodeHexError(err)
    }
}

/// Packet received from the wire.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Packet {
    Ack,
    Nack,
    Interrupt,
    Command(Request),
}

/// Body of a `$...#cc` frame.
#[derive(PartialEq, Eq, Debug, Clone)]
pub struct Request {
    seq: Option<u8>,
    body: Bytes,
    token_len: usize,
}

fn is_token_delimiter(b: u8) -> bool {
    matches!(b, b':' | b';' | b',')
}

impl Request {
    /// Creates a request from a frame body (checksum already validated).
    pub fn new<B: Into<Bytes>>(body: B) -> Self {
        let body = body.into();
        let token_len = body
            .iter()
            .position(|b| is_token_delimiter(*b))
            .unwrap_or(body.len());
        Request {
            seq: None,
            body,
            token_len,
        }
    }

    /// Like [`Request::new`], but splits off a leading `xx:` sequence id.
    pub fn with_sequence_id<B: Into<Bytes>>(body: B) -> Self {
        let mut body = body.into();
        let seq = if body.len() >= 3 && body[2] == b':' {
            decode_hex::<u8>(&body[..2]).ok()
        } else {
            None
        };
        if seq.is_some() {
            let _ = body.split_to(3);
        }
        let mut request = Self::new(body);
        request.seq = seq;
        request
    }

    pub fn interrupt() -> Self {
        Self::new(Bytes::from_static(INTERRUPT_TOKEN.as_bytes()))
    }

    /// Full body, without sequence id.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Leading characters up to the first `:`, `;` or `,`.
    pub fn token(&self) -> &[u8] {
        &self.body[..self.token_len]
    }

    /// Everything after the token, minus one leading `:` or `;`.
    pub fn payload(&self) -> &[u8] {
        Self::payload_after(&self.body, self.token_len)
    }

    /// Payload following a caller-chosen token length.
    pub(crate) fn payload_after(body: &[u8], len: usize) -> &[u8] {
        let rest = &body[len..];
        match rest.first() {
            Some(b':') | Some(b';') => &rest[1..],
            _ => rest,
        }
    }

    pub fn sequence_id(&self) -> Option<u8> {
        self.seq
    }
}

pub(crate) fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |a, x| a.wrapping_add(*x))
}

/// Validate a complete `$body#cc` frame and return the body.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<&[u8], PacketParseError> {
    match frame.first() {
        None => return Err(PacketParseError::EmptyBuf),
        Some(b'$') => {}
        Some(&other) => return Err(PacketParseError::UnexpectedHeader(other)),
    }

    let end_of_body = frame
        .iter()
        .position(|b| *b == b'#')
        .ok_or(PacketParseError::MissingChecksum)?;

    let body = &frame[1..end_of_body];
    let checksum_digits = frame
        .get(end_of_body + 1..end_of_body + 3)
        .ok_or(PacketParseError::MissingChecksum)?;
    let expected =
        decode_hex::<u8>(checksum_digits).map_err(|_| PacketParseError::MalformedChecksum)?;
    let calculated = checksum(body);
    if calculated != expected {
        return Err(PacketParseError::ChecksumMismatched {
            checksum: expected,
            calculated,
        });
    }

    Ok(body)
}
