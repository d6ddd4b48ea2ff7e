//! Status protocol packets.
//!
//! The status protocol is used by clients to query server information
//! without joining.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::packet::{PacketReader, PacketWriter};
use crate::packets::traits::{ConnectionState, Packet};

/// Status Request packet (client -> server).
///
/// This is an empty packet that requests server status.
#[derive(Debug, Clone, Default)]
pub struct StatusRequest;

impl Packet for StatusRequest {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Status;
}

impl StatusRequest {
    /// Parse a status request from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet ID is invalid.
    pub const fn decode(reader: &PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self)
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).encode()
    }
}

/// Status Response packet (server -> client).
///
/// Contains a JSON object with server information.
#[derive(Debug, Clone)]
pub struct StatusResponse {
    /// Server status (version, players, description).
    pub status: serde_json::Value,
}

impl Packet for StatusResponse {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Status;
}

impl StatusResponse {
    /// Create a new status response.
    #[must_use]
    pub const fn new(status: serde_json::Value) -> Self {
        Self { status }
    }

    /// Parse a status response from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed or the body is not
    /// valid JSON.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            status: reader.read_json()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).write_json(&self.status).encode()
    }
}

/// Ping packet (client -> server).
///
/// Client sends an arbitrary payload, server echoes it back.
#[derive(Debug, Clone)]
pub struct Ping {
    /// Arbitrary payload (usually a timestamp).
    pub payload: u64,
}

impl Packet for Ping {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Status;
}

impl Ping {
    /// Create a new ping with the given payload.
    #[must_use]
    pub const fn new(payload: u64) -> Self {
        Self { payload }
    }

    /// Parse a ping from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            payload: reader.read_u64()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).write_u64(self.payload).encode()
    }
}

/// Pong packet (server -> client).
///
/// Server echoes back the ping payload.
#[derive(Debug, Clone)]
pub struct Pong {
    /// The payload from the ping packet.
    pub payload: u64,
}

impl Packet for Pong {
    const ID: i32 = 0x01;
    const STATE: ConnectionState = ConnectionState::Status;
}

impl Pong {
    /// Create a new pong with the given payload.
    #[must_use]
    pub const fn new(payload: u64) -> Self {
        Self { payload }
    }

    /// Parse a pong from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            payload: reader.read_u64()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).write_u64(self.payload).encode()
    }
}
