//! Packet framing for the Minecraft protocol.
//!
//! Uncompressed framing:
//! - `[VarInt length][payload...]`
//!
//! Once a non-negative compression threshold has been negotiated:
//! - `[VarInt frame_length][VarInt uncompressed_length][body...]`
//!
//! where `uncompressed_length == 0` marks a literal body (payload below
//! the threshold) and any other value the zlib-compressed form of exactly
//! that many bytes. The payload always begins with the packet-ID varint.
//!
//! The decoder consumes from a growable buffer fed by the stream, so a
//! frame whose length prefix or body is split across reads is simply left
//! in place until the rest arrives.

use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::{ProtocolError, Result};
use crate::varint::{peek_varint, read_varint, write_varint};

/// Maximum frame size (2 MiB, same as vanilla).
pub const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Encode one packet payload into `out` as a single frame.
///
/// A negative `threshold` selects uncompressed framing. With a
/// non-negative threshold, payloads shorter than the threshold are sent
/// literally with a zero `uncompressed_length` marker and longer payloads
/// are deflated.
///
/// # Errors
///
/// Returns an error if deflation fails.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn encode_frame(payload: &[u8], threshold: i32, out: &mut BytesMut) -> Result<()> {
    if threshold < 0 {
        write_varint(out, payload.len() as i32);
        out.extend_from_slice(payload);
        return Ok(());
    }

    #[allow(clippy::cast_sign_loss)]
    if payload.len() < threshold as usize {
        // Below threshold: literal body, zero marker
        write_varint(out, payload.len() as i32 + 1);
        write_varint(out, 0);
        out.extend_from_slice(payload);
        return Ok(());
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let compressed = encoder.finish()?;

    let mut inner = BytesMut::with_capacity(compressed.len() + 5);
    write_varint(&mut inner, payload.len() as i32);
    inner.extend_from_slice(&compressed);

    write_varint(out, inner.len() as i32);
    out.extend_from_slice(&inner);
    Ok(())
}

/// Try to decode one complete frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// buffered bytes are left untouched for the next attempt.
///
/// # Errors
///
/// Returns an error if the length prefix is malformed, the frame exceeds
/// [`MAX_FRAME_SIZE`], or a compressed body does not inflate to its
/// declared length.
pub fn decode_frame(buf: &mut BytesMut, threshold: i32) -> Result<Option<Bytes>> {
    let Some((length, prefix_len)) = peek_varint(&buf[..])? else {
        return Ok(None);
    };

    let length = usize::try_from(length).map_err(|_| ProtocolError::PacketTooLong {
        len: 0,
        max: MAX_FRAME_SIZE,
    })?;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::PacketTooLong {
            len: length,
            max: MAX_FRAME_SIZE,
        });
    }

    if buf.len() < prefix_len + length {
        return Ok(None);
    }

    buf.advance(prefix_len);
    let mut frame = buf.split_to(length).freeze();

    if threshold < 0 {
        return Ok(Some(frame));
    }

    let declared = read_varint(&mut frame)?;
    if declared == 0 {
        // Literal body below the threshold
        return Ok(Some(frame));
    }

    let declared = usize::try_from(declared).map_err(|_| ProtocolError::PacketTooLong {
        len: 0,
        max: MAX_FRAME_SIZE,
    })?;
    if declared > MAX_FRAME_SIZE {
        return Err(ProtocolError::PacketTooLong {
            len: declared,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut payload = Vec::with_capacity(declared);
    let mut decoder = ZlibDecoder::new(&frame[..]).take(declared as u64 + 1);
    decoder
        .read_to_end(&mut payload)
        .map_err(|_| ProtocolError::FrameCorrupt {
            declared,
            actual: payload.len(),
        })?;

    if payload.len() != declared {
        return Err(ProtocolError::FrameCorrupt {
            declared,
            actual: payload.len(),
        });
    }

    Ok(Some(Bytes::from(payload)))
}
