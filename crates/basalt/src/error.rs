//! Connection error types.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use basalt_mc::ProtocolError;

/// Errors that can occur on a live connection.
///
/// Codec-level failures ([`ProtocolError`]) indicate protocol
/// desynchronization and are fatal to the connection; handshake failures
/// ([`ConnectionError::VerifyTokenMismatch`],
/// [`ConnectionError::SessionNotJoinable`]) terminate only the login
/// attempt.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// A wire-protocol decoding or encoding failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The underlying byte stream failed.
    #[error("stream error: {0}")]
    Stream(#[from] io::Error),

    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(io::Error),

    /// The decrypted verify token did not match the one sent.
    #[error("verify token mismatch")]
    VerifyTokenMismatch,

    /// The session authority rejected or could not verify the session.
    #[error("session not joinable")]
    SessionNotJoinable,

    /// The peer failed to answer a keep-alive within the kick timeout.
    #[error("keep-alive timed out")]
    TimeoutDisconnect,

    /// The operation is only valid for the server role.
    #[error("operation requires the server role")]
    WrongRole,

    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The connection was torn down by an earlier fatal error.
    #[error("connection lost: {0}")]
    Lost(Arc<ConnectionError>),

    /// An RSA operation failed.
    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// The peer's public key bytes could not be parsed.
    #[error("public key error: {0}")]
    Key(#[from] rsa::pkcs8::spki::Error),

    /// A session-server request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using [`ConnectionError`].
pub type Result<T> = std::result::Result<T, ConnectionError>;
