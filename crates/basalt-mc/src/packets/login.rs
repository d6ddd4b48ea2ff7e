//! Login protocol packets.
//!
//! The login protocol handles player authentication: encryption
//! negotiation, compression negotiation, and the transition to play.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::ids;
use crate::packet::{PacketReader, PacketWriter};
use crate::packets::traits::{ConnectionState, Packet};

/// Login Disconnect packet (server -> client).
///
/// Sent when the server disconnects the client during login. The reason
/// is a JSON chat component, never raw error text.
#[derive(Debug, Clone)]
pub struct LoginDisconnect {
    /// The disconnect reason (JSON chat component).
    pub reason: serde_json::Value,
}

impl Packet for LoginDisconnect {
    const ID: i32 = ids::LOGIN_DISCONNECT;
    const STATE: ConnectionState = ConnectionState::Login;
}

impl LoginDisconnect {
    /// Create a new disconnect packet.
    #[must_use]
    pub const fn new(reason: serde_json::Value) -> Self {
        Self { reason }
    }

    /// Parse from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            reason: reader.read_json()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).write_json(&self.reason).encode()
    }
}

/// Encryption Request packet (server -> client).
///
/// Sent by the server to initiate the encryption handshake.
#[derive(Debug, Clone)]
pub struct EncryptionRequest {
    /// Random session identifier.
    pub server_id: String,
    /// The server's public key (DER-encoded, as sent on the wire).
    pub public_key: Bytes,
    /// Random verify token.
    pub verify_token: Bytes,
}

impl Packet for EncryptionRequest {
    const ID: i32 = ids::LOGIN_ENCRYPTION;
    const STATE: ConnectionState = ConnectionState::Login;
}

impl EncryptionRequest {
    /// Parse from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            server_id: reader.read_string()?,
            public_key: reader.read_byte_array()?,
            verify_token: reader.read_byte_array()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID)
            .write_string(&self.server_id)
            .write_byte_array(&self.public_key)
            .write_byte_array(&self.verify_token)
            .encode()
    }
}

/// Encryption Response packet (client -> server).
///
/// Both fields are RSA-encrypted against the server's public key.
#[derive(Debug, Clone)]
pub struct EncryptionResponse {
    /// The 16-byte shared secret, encrypted.
    pub shared_secret: Bytes,
    /// The server's verify token, encrypted unmodified.
    pub verify_token: Bytes,
}

impl Packet for EncryptionResponse {
    const ID: i32 = ids::LOGIN_ENCRYPTION;
    const STATE: ConnectionState = ConnectionState::Login;
}

impl EncryptionResponse {
    /// Parse from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            shared_secret: reader.read_byte_array()?,
            verify_token: reader.read_byte_array()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID)
            .write_byte_array(&self.shared_secret)
            .write_byte_array(&self.verify_token)
            .encode()
    }
}

/// Login Success packet (server -> client).
///
/// Sent when login is complete; the connection transitions to Play.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    /// The player's UUID, as a hyphenated string.
    pub uuid: String,
    /// The player's username.
    pub username: String,
}

impl Packet for LoginSuccess {
    const ID: i32 = ids::LOGIN_SUCCESS;
    const STATE: ConnectionState = ConnectionState::Login;
}

impl LoginSuccess {
    /// Create a new login success packet.
    #[must_use]
    pub fn new(uuid: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            username: username.into(),
        }
    }

    /// Parse from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            uuid: reader.read_string()?,
            username: reader.read_string()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID)
            .write_string(&self.uuid)
            .write_string(&self.username)
            .encode()
    }
}

/// Set Compression packet (server -> client).
///
/// Enables packet compression for both directions of the connection.
#[derive(Debug, Clone)]
pub struct SetCompression {
    /// Compression threshold. Packets at least this long are compressed;
    /// a negative value disables compression.
    pub threshold: i32,
}

impl Packet for SetCompression {
    const ID: i32 = ids::LOGIN_SET_COMPRESSION;
    const STATE: ConnectionState = ConnectionState::Login;
}

impl SetCompression {
    /// Create a new set compression packet.
    #[must_use]
    pub const fn new(threshold: i32) -> Self {
        Self { threshold }
    }

    /// Parse from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            threshold: reader.read_varint()?,
        })
    }

    /// Encode to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID).write_varint(self.threshold).encode()
    }
}
