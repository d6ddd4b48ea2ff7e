//! Server address resolution.
//!
//! Minecraft servers can advertise their real host and port through a
//! `_minecraft._tcp` SRV record. The lookup only happens when the caller
//! gave no explicit port, and every failure falls back silently to the
//! host itself on the default port.

use std::net::IpAddr;

use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// The default Minecraft server port.
pub const DEFAULT_PORT: u16 = 25565;

/// Resolve the address to actually connect to.
///
/// With an explicit `port` the input is returned untouched. Otherwise the
/// `_minecraft._tcp.<host>` SRV record is consulted; any resolver error
/// or empty answer falls back to `(host, 25565)`.
pub async fn resolve_server_address(host: &str, port: Option<u16>) -> (String, u16) {
    if let Some(port) = port {
        return (host.to_string(), port);
    }

    // SRV records only make sense for hostnames
    if host.parse::<IpAddr>().is_err() {
        if let Some(resolved) = lookup_srv(host).await {
            return resolved;
        }
    }

    (host.to_string(), DEFAULT_PORT)
}

async fn lookup_srv(host: &str) -> Option<(String, u16)> {
    let resolver = TokioAsyncResolver::tokio_from_system_conf().ok()?;
    let lookup = resolver
        .srv_lookup(format!("_minecraft._tcp.{host}"))
        .await
        .ok()?;
    let record = lookup.iter().next()?;

    let target = record.target().to_utf8();
    let target = target.trim_end_matches('.').to_string();
    debug!(host, target = %target, port = record.port(), "SRV record found");
    Some((target, record.port()))
}
