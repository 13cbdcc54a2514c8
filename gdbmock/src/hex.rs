/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use num_traits::CheckedAdd;
use num_traits::CheckedMul;
use num_traits::FromPrimitive;
use num_traits::Zero;
use thiserror::Error;

/// Decode gdb hex error code
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum GdbHexError {
    /// Invalid hex digit
    #[error("Input contains non-hex chars")]
    NotAscii,
    /// Input is empty
    #[error("Input is empty")]
    Empty,
    /// Output is too small: overflowed
    #[error("Output is too small/overflowed")]
    Overflow,
    /// Invalid Hex input
    #[error("Gdb hex is malformed")]
    InvalidGdbHex,
    /// Invalid Output (num) type.
    #[error("Invalid output num type")]
    InvalidOutput,
}

fn from_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn to_hex(nibble: u8) -> u8 {
    match nibble {
        0..=9 => b'0' + nibble,
        _ => b'a' + nibble - 10,
    }
}

/// Decode a GDB hex string into the specified integer.
pub fn decode_hex<I>(buf: &[u8]) -> Result<I, GdbHexError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    if buf.is_empty() {
        return Err(GdbHexError::Empty);
    }

    let radix = I::from_u8(16).ok_or(GdbHexError::InvalidOutput)?;
    let mut result = I::zero();

    for &digit in buf {
        let x = I::from_u8(from_hex(digit).ok_or(GdbHexError::NotAscii)?)
            .ok_or(GdbHexError::InvalidOutput)?;
        result = result.checked_mul(&radix).ok_or(GdbHexError::Overflow)?;
        result = result.checked_add(&x).ok_or(GdbHexError::Overflow)?
    }

    Ok(result)
}

/// Decode a decimal number, as used by the platform packets (`pid:1337;`).
pub fn decode_dec<I>(buf: &[u8]) -> Result<I, GdbHexError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    if buf.is_empty() {
        return Err(GdbHexError::Empty);
    }

    let radix = I::from_u8(10).ok_or(GdbHexError::InvalidOutput)?;
    let mut result = I::zero();

    for &digit in buf {
        if !digit.is_ascii_digit() {
            return Err(GdbHexError::NotAscii);
        }
        let x = I::from_u8(digit - b'0').ok_or(GdbHexError::InvalidOutput)?;
        result = result.checked_mul(&radix).ok_or(GdbHexError::Overflow)?;
        result = result.checked_add(&x).ok_or(GdbHexError::Overflow)?
    }

    Ok(result)
}

/// Decode a GDB hex string into a u8 Vector.
pub fn decode_hex_string(buf: &[u8]) -> Result<Vec<u8>, GdbHexError> {
    if buf.len() % 2 != 0 {
        return Err(GdbHexError::InvalidGdbHex);
    }

    buf.chunks_exact(2)
        .map(|pair| {
            let hi = from_hex(pair[0]).ok_or(GdbHexError::NotAscii)?;
            let lo = from_hex(pair[1]).ok_or(GdbHexError::NotAscii)?;
            Ok(16 * hi + lo)
        })
        .collect()
}

/// Encode bytes as a lower case GDB hex string.
pub fn encode_hex_string(data: &[u8]) -> String {
    let mut res = String::with_capacity(data.len() * 2);
    for &b in data {
        res.push(to_hex(b >> 4) as char);
        res.push(to_hex(b & 0xf) as char);
    }
    res
}
