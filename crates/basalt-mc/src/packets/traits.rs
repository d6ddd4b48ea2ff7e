//! Packet traits and the connection state enum.

/// The protocol state of a connection.
///
/// A connection starts in `Handshake` and advances monotonically:
/// `Handshake` branches into `Status` or `Login` (chosen by the handshake
/// packet's next-state field), and `Login` advances to `Play`. It never
/// moves backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Initial state, before the handshake packet.
    Handshake,
    /// Server list ping. Terminal.
    Status,
    /// Authentication and encryption negotiation.
    Login,
    /// In-game. Terminal (ends only via disconnect/close).
    Play,
}

impl TryFrom<i32> for ConnectionState {
    type Error = crate::error::ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Handshake),
            1 => Ok(Self::Status),
            2 => Ok(Self::Login),
            3 => Ok(Self::Play),
            _ => Err(crate::error::ProtocolError::InvalidNextState(value)),
        }
    }
}

/// A packet type with a fixed ID.
///
/// Play-state packets whose IDs depend on the protocol version
/// ([`crate::ids::PacketIds`]) do not implement this trait; they take
/// their resolved ID explicitly.
pub trait Packet: Sized {
    /// The packet ID.
    const ID: i32;

    /// The connection state this packet belongs to.
    const STATE: ConnectionState;
}
