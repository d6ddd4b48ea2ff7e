//! Protocol error types.

use std::io;

use thiserror::Error;

/// Errors that can occur when reading or writing Minecraft protocol data.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A varint had no terminating byte within its maximum width.
    #[error("malformed varint: missing terminator")]
    MalformedVarint,

    /// A string or JSON field could not be decoded.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A read ran past the end of the packet buffer.
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    BufferUnderrun {
        /// The number of bytes the read required.
        needed: usize,
        /// The number of bytes left in the buffer.
        remaining: usize,
    },

    /// A compressed frame did not inflate to its declared length.
    #[error("corrupt frame: declared {declared} bytes, inflated to {actual}")]
    FrameCorrupt {
        /// The uncompressed length declared in the frame header.
        declared: usize,
        /// The length the body actually inflated to.
        actual: usize,
    },

    /// A frame exceeded the maximum length.
    #[error("packet too long: {len} bytes (max {max})")]
    PacketTooLong {
        /// The actual length of the frame.
        len: usize,
        /// The maximum allowed length.
        max: usize,
    },

    /// An invalid next state was received in a handshake.
    #[error("invalid next state: {0}")]
    InvalidNextState(i32),

    /// An unexpected packet ID was received.
    #[error("invalid packet ID: {0}")]
    InvalidPacketId(i32),
}

/// Result type alias using [`ProtocolError`].
pub type Result<T> = std::result::Result<T, ProtocolError>;
