//! Mojang session server client.
//!
//! During the encryption handshake both sides talk to the session
//! authority: the client registers its session hash with `join`, the
//! server confirms it with `hasJoined`. The connection reaches the
//! authority through the [`SessionService`] trait so tests can substitute
//! a canned implementation.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use tracing::debug;

use crate::error::{ConnectionError, Result};

/// Boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The session authority consulted during the encryption handshake.
pub trait SessionService: Send + Sync {
    /// Register a session: the client proves ownership of `access_token`
    /// and binds `profile` to the session hash.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::SessionNotJoinable`] when the authority
    /// rejects the session, or a transport error.
    fn join_session<'a>(
        &'a self,
        access_token: &'a str,
        profile: &'a str,
        server_hash: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Check whether `username` registered a session with this hash.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the authority is unreachable.
    fn has_joined<'a>(
        &'a self,
        username: &'a str,
        server_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool>>;
}

/// Base URL of Mojang's session server.
const SESSION_SERVER: &str = "https://sessionserver.mojang.com/session/minecraft";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest<'a> {
    access_token: &'a str,
    selected_profile: &'a str,
    server_id: &'a str,
}

/// [`SessionService`] backed by Mojang's session server.
pub struct MojangSessionService {
    client: reqwest::Client,
    base_url: String,
}

impl Default for MojangSessionService {
    fn default() -> Self {
        Self::new(SESSION_SERVER)
    }
}

impl MojangSessionService {
    /// Create a service against a custom base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl SessionService for MojangSessionService {
    fn join_session<'a>(
        &'a self,
        access_token: &'a str,
        profile: &'a str,
        server_hash: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let response = self
                .client
                .post(format!("{}/join", self.base_url))
                .json(&JoinRequest {
                    access_token,
                    selected_profile: profile,
                    server_id: server_hash,
                })
                .send()
                .await?;

            debug!(status = %response.status(), "session join");
            if response.status().is_success() {
                Ok(())
            } else {
                Err(ConnectionError::SessionNotJoinable)
            }
        })
    }

    fn has_joined<'a>(
        &'a self,
        username: &'a str,
        server_hash: &'a str,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let response = self
                .client
                .get(format!("{}/hasJoined", self.base_url))
                .query(&[("username", username), ("serverId", server_hash)])
                .send()
                .await?;

            debug!(status = %response.status(), username, "session lookup");
            // 200 carries the profile; 204 means no session was registered.
            Ok(response.status() == reqwest::StatusCode::OK)
        })
    }
}
