//! Handshake packet definitions.
//!
//! The handshake is the first packet sent by the client and determines
//! whether this is a status ping or a login attempt.

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::packet::{PacketReader, PacketWriter};
use crate::packets::traits::{ConnectionState, Packet};

/// The next state after handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextState {
    /// Status request (server list ping).
    Status = 1,
    /// Login request.
    Login = 2,
}

impl TryFrom<i32> for NextState {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(Self::Status),
            2 => Ok(Self::Login),
            _ => Err(ProtocolError::InvalidNextState(value)),
        }
    }
}

impl From<NextState> for ConnectionState {
    fn from(next: NextState) -> Self {
        match next {
            NextState::Status => Self::Status,
            NextState::Login => Self::Login,
        }
    }
}

/// Handshake packet sent by the client.
///
/// This is always the first packet in a connection. It carries the
/// protocol version, which fixes the version-dependent packet IDs for the
/// rest of the session.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The protocol version the client is using.
    pub protocol_version: i32,
    /// The server address the client connected to.
    pub server_address: String,
    /// The server port the client connected to.
    pub server_port: u16,
    /// The next state: Status (1) or Login (2).
    pub next_state: NextState,
}

impl Packet for Handshake {
    const ID: i32 = 0x00;
    const STATE: ConnectionState = ConnectionState::Handshake;
}

impl Handshake {
    /// Parse a handshake from a packet reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the packet is malformed.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        if reader.id != Self::ID {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }

        let protocol_version = reader.read_varint()?;
        let server_address = reader.read_string()?;
        let server_port = reader.read_u16()?;
        let next_state = NextState::try_from(reader.read_varint()?)?;

        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }

    /// Encode the handshake to packet bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        PacketWriter::new(Self::ID)
            .write_varint(self.protocol_version)
            .write_string(&self.server_address)
            .write_u16(self.server_port)
            .write_varint(self.next_state as i32)
            .encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_roundtrip() {
        let original = Handshake {
            protocol_version: 404,
            server_address: "localhost".to_string(),
            server_port: 25565,
            next_state: NextState::Status,
        };

        let mut reader = PacketReader::new(original.encode()).unwrap();
        let parsed = Handshake::decode(&mut reader).unwrap();

        assert_eq!(parsed.protocol_version, original.protocol_version);
        assert_eq!(parsed.server_address, original.server_address);
        assert_eq!(parsed.server_port, original.server_port);
        assert_eq!(parsed.next_state, original.next_state);
    }

    #[test]
    fn test_next_state_conversion() {
        assert_eq!(NextState::try_from(1).unwrap(), NextState::Status);
        assert_eq!(NextState::try_from(2).unwrap(), NextState::Login);
        assert!(NextState::try_from(0).is_err());
        assert!(NextState::try_from(3).is_err());
    }
}
