//! Minecraft wire protocol for Basalt.
//!
//! This crate provides the varint codec, the packet reader/writer, the
//! frame transport (length framing plus zlib compression), the
//! version-dependent packet IDs, and typed definitions for the packets
//! the connection state machine cares about.

pub mod error;
pub mod framing;
pub mod ids;
pub mod packet;
pub mod packets;
pub mod varint;

pub use error::ProtocolError;
pub use ids::PacketIds;
pub use packet::{PacketReader, PacketWriter};
pub use packets::ConnectionState;
