//! Play protocol packets.
//!
//! Only keep-alive and disconnect matter to the connection state machine;
//! every other play packet is an opaque byte blob passed through to the
//! caller. Play packet IDs depend on the negotiated protocol version
//! ([`crate::ids::PacketIds`]), so these types take a resolved ID instead
//! of implementing [`crate::packets::Packet`].

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::packet::{PacketReader, PacketWriter};

/// Keep-alive probe/echo.
///
/// The server sends a fresh random 8-byte payload on the clientbound ID;
/// the client echoes the identical bytes on the serverbound ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlive {
    /// The 8-byte probe payload.
    pub payload: [u8; 8],
}

impl KeepAlive {
    /// Create a keep-alive with the given payload.
    #[must_use]
    pub const fn new(payload: [u8; 8]) -> Self {
        Self { payload }
    }

    /// Parse from a packet reader; the caller has already matched the ID.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than 8 payload bytes remain.
    pub fn decode(reader: &mut PacketReader) -> Result<Self> {
        let bytes = reader.read_bytes(8)?;
        let mut payload = [0u8; 8];
        payload.copy_from_slice(&bytes);
        Ok(Self { payload })
    }

    /// Encode with the version-resolved packet ID.
    #[must_use]
    pub fn encode(&self, id: i32) -> Bytes {
        PacketWriter::new(id).write_bytes(&self.payload).encode()
    }
}

/// Play-state disconnect (server -> client).
#[derive(Debug, Clone)]
pub struct PlayDisconnect {
    /// The disconnect reason (JSON chat component).
    pub reason: serde_json::Value,
}

impl PlayDisconnect {
    /// Create a new disconnect packet.
    #[must_use]
    pub const fn new(reason: serde_json::Value) -> Self {
        Self { reason }
    }

    /// Parse from a packet reader with the expected version-resolved ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID does not match or the reason is not
    /// valid JSON.
    pub fn decode(reader: &mut PacketReader, id: i32) -> Result<Self> {
        if reader.id != id {
            return Err(ProtocolError::InvalidPacketId(reader.id));
        }
        Ok(Self {
            reason: reader.read_json()?,
        })
    }

    /// Encode with the version-resolved packet ID.
    #[must_use]
    pub fn encode(&self, id: i32) -> Bytes {
        PacketWriter::new(id).write_json(&self.reason).encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PacketIds;
    use serde_json::json;

    #[test]
    fn test_keep_alive_roundtrip() {
        let ids = PacketIds::for_protocol(404);
        let original = KeepAlive::new([1, 2, 3, 4, 5, 6, 7, 8]);
        let mut reader =
            PacketReader::new(original.encode(ids.keep_alive_clientbound)).unwrap();
        assert_eq!(reader.id, ids.keep_alive_clientbound);
        assert_eq!(KeepAlive::decode(&mut reader).unwrap(), original);
    }

    #[test]
    fn test_play_disconnect_roundtrip() {
        let ids = PacketIds::for_protocol(404);
        let original = PlayDisconnect::new(json!({"translate": "disconnect.timeout"}));
        let mut reader = PacketReader::new(original.encode(ids.disconnect)).unwrap();
        let parsed = PlayDisconnect::decode(&mut reader, ids.disconnect).unwrap();
        assert_eq!(parsed.reason, original.reason);
    }
}
