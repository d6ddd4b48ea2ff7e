//! Client-oriented Minecraft protocol sessions.
//!
//! Built on [`basalt_mc`] for the wire format, this crate runs live
//! connections: the [`Connection`] state machine with keep-alive,
//! pause/resume, and typed login handling, the RSA/AES-CFB8 encryption
//! handshake with Mojang session binding, and SRV-based server address
//! resolution.

pub mod auth;
pub mod connection;
pub mod crypto;
pub mod dns;
pub mod error;

pub use auth::{MojangSessionService, SessionService};
pub use connection::{Connection, ConnectionConfig};
pub use crypto::ServerKeys;
pub use error::{ConnectionError, Result};
