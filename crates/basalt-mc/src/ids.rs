//! Protocol-version-dependent packet IDs.
//!
//! A handful of play-state packet IDs moved between protocol versions.
//! The connection resolves them once, when the handshake's protocol
//! version field is read, and they stay fixed for the connection's
//! lifetime.

/// Protocol version where keep-alive (clientbound) and disconnect moved.
const KEEP_ALIVE_DISCONNECT_SHIFT: i32 = 345;

/// Protocol version where keep-alive (serverbound) moved.
const KEEP_ALIVE_SERVERBOUND_SHIFT: i32 = 389;

/// The play-state packet IDs resolved for a negotiated protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIds {
    /// Keep-alive sent by the server (clientbound).
    pub keep_alive_clientbound: i32,
    /// Keep-alive echo sent by the client (serverbound).
    pub keep_alive_serverbound: i32,
    /// Play-state disconnect (clientbound).
    pub disconnect: i32,
}

impl PacketIds {
    /// Resolve the IDs for a protocol version.
    #[must_use]
    pub const fn for_protocol(version: i32) -> Self {
        Self {
            keep_alive_clientbound: if version < KEEP_ALIVE_DISCONNECT_SHIFT {
                0x1f
            } else {
                0x21
            },
            keep_alive_serverbound: if version < KEEP_ALIVE_SERVERBOUND_SHIFT {
                0xb
            } else {
                0xe
            },
            disconnect: if version < KEEP_ALIVE_DISCONNECT_SHIFT {
                0x1a
            } else {
                0x1b
            },
        }
    }
}

/// Login-state disconnect (clientbound).
pub const LOGIN_DISCONNECT: i32 = 0x00;
/// Encryption request (clientbound) / response (serverbound).
pub const LOGIN_ENCRYPTION: i32 = 0x01;
/// Login success (clientbound).
pub const LOGIN_SUCCESS: i32 = 0x02;
/// Set compression (clientbound).
pub const LOGIN_SET_COMPRESSION: i32 = 0x03;
