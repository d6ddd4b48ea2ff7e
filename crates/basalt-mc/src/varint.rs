//! `VarInt` and `VarLong` encoding/decoding for Minecraft protocol.
//!
//! Minecraft uses a variable-length integer encoding where each byte
//! uses 7 bits for data and 1 bit to indicate if more bytes follow.

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};

/// Segment bits mask (lower 7 bits).
const SEGMENT_BITS: u8 = 0x7F;

/// Continue bit (high bit).
const CONTINUE_BIT: u8 = 0x80;

/// Read a `VarInt` from a buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedVarint`] if the encoding is longer
/// than 5 bytes and [`ProtocolError::BufferUnderrun`] if the buffer ends
/// before a terminating byte.
pub fn read_varint(buf: &mut impl Buf) -> Result<i32> {
    let mut value: i32 = 0;
    let mut position: u32 = 0;

    loop {
        if !buf.has_remaining() {
            return Err(ProtocolError::BufferUnderrun {
                needed: 1,
                remaining: 0,
            });
        }
        let byte = buf.get_u8();
        value |= i32::from(byte & SEGMENT_BITS) << position;

        if byte & CONTINUE_BIT == 0 {
            break;
        }

        position += 7;
        if position >= 32 {
            return Err(ProtocolError::MalformedVarint);
        }
    }

    Ok(value)
}

/// Read a `VarLong` from a buffer.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedVarint`] if the encoding is longer
/// than 10 bytes and [`ProtocolError::BufferUnderrun`] if the buffer ends
/// before a terminating byte.
pub fn read_varlong(buf: &mut impl Buf) -> Result<i64> {
    let mut value: i64 = 0;
    let mut position: u32 = 0;

    loop {
        if !buf.has_remaining() {
            return Err(ProtocolError::BufferUnderrun {
                needed: 1,
                remaining: 0,
            });
        }
        let byte = buf.get_u8();
        value |= i64::from(byte & SEGMENT_BITS) << position;

        if byte & CONTINUE_BIT == 0 {
            break;
        }

        position += 7;
        if position >= 64 {
            return Err(ProtocolError::MalformedVarint);
        }
    }

    Ok(value)
}

/// Write a `VarInt` to a buffer. Returns the number of bytes written.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub fn write_varint(buf: &mut impl BufMut, mut value: i32) -> usize {
    let mut bytes_written = 0;

    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & i32::from(SEGMENT_BITS)) as u8;
        value = ((value as u32) >> 7) as i32;

        if value != 0 {
            byte |= CONTINUE_BIT;
        }

        buf.put_u8(byte);
        bytes_written += 1;

        if value == 0 {
            break;
        }
    }

    bytes_written
}

/// Write a `VarLong` to a buffer. Returns the number of bytes written.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
pub fn write_varlong(buf: &mut impl BufMut, mut value: i64) -> usize {
    let mut bytes_written = 0;

    loop {
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (value & i64::from(SEGMENT_BITS)) as u8;
        value = ((value as u64) >> 7) as i64;

        if value != 0 {
            byte |= CONTINUE_BIT;
        }

        buf.put_u8(byte);
        bytes_written += 1;

        if value == 0 {
            break;
        }
    }

    bytes_written
}

/// Try to read a `VarInt` from the front of a slice without consuming it.
///
/// Returns `Ok(None)` when the slice ends mid-varint (more bytes are
/// needed), otherwise the decoded value and the number of bytes it used.
/// Used by the frame decoder, whose length prefix may arrive split across
/// stream chunks.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedVarint`] if the encoding is longer
/// than 5 bytes.
pub fn peek_varint(bytes: &[u8]) -> Result<Option<(i32, usize)>> {
    let mut value: i32 = 0;
    let mut position: u32 = 0;

    for (i, &byte) in bytes.iter().enumerate() {
        value |= i32::from(byte & SEGMENT_BITS) << position;

        if byte & CONTINUE_BIT == 0 {
            return Ok(Some((value, i + 1)));
        }

        position += 7;
        if position >= 32 {
            return Err(ProtocolError::MalformedVarint);
        }
    }

    Ok(None)
}

/// Calculate the number of bytes needed to encode a `VarInt`.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn varint_len(value: i32) -> usize {
    // Convert to unsigned for bit manipulation
    let value = value as u32;

    if value == 0 {
        return 1;
    }

    // Calculate the number of 7-bit segments needed
    let bits_needed = 32 - value.leading_zeros();
    (bits_needed as usize).div_ceil(7)
}
