//! Minecraft protocol packets.
//!
//! Packets are organized by connection state:
//! - Handshake: initial connection state
//! - Status: server list ping
//! - Login: authentication and negotiation
//! - Play: keep-alive and disconnect only; other play packets are opaque

pub mod handshake;
pub mod login;
pub mod play;
pub mod status;
pub mod traits;

pub use handshake::{Handshake, NextState};
pub use login::{
    EncryptionRequest, EncryptionResponse, LoginDisconnect, LoginSuccess, SetCompression,
};
pub use play::{KeepAlive, PlayDisconnect};
pub use status::{Ping, Pong, StatusRequest, StatusResponse};
pub use traits::{ConnectionState, Packet};
