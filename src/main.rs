//! Server list ping.
//!
//! Connects to a server, requests its status, and measures the ping
//! round trip:
//!
//! ```text
//! basalt-ping [host] [port]
//! ```

use std::env;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::info;
use tracing_subscriber::EnvFilter;

use basalt::{Connection, ConnectionConfig};
use basalt_mc::PacketReader;
use basalt_mc::packets::{Handshake, NextState, Packet, Ping, Pong, StatusRequest, StatusResponse};

const PROTOCOL_VERSION: i32 = 404;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port: Option<u16> = args.next().map(|arg| arg.parse()).transpose()?;

    let conn = Connection::connect(&host, port, ConnectionConfig::default()).await?;

    let handshake = Handshake {
        protocol_version: PROTOCOL_VERSION,
        server_address: host.clone(),
        server_port: port.unwrap_or(basalt::dns::DEFAULT_PORT),
        next_state: NextState::Status,
    };
    conn.send(handshake.encode()).await?;
    conn.send(StatusRequest.encode()).await?;

    let frame = conn.next_packet_with_id(StatusResponse::ID).await?;
    let mut reader = PacketReader::new(frame)?;
    let status = StatusResponse::decode(&mut reader)?;

    let payload = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
    let sent = Instant::now();
    conn.send(Ping::new(payload).encode()).await?;

    let frame = conn.next_packet_with_id(Pong::ID).await?;
    let mut reader = PacketReader::new(frame)?;
    let pong = Pong::decode(&mut reader)?;
    let latency = sent.elapsed();
    if pong.payload != payload {
        info!(sent = payload, echoed = pong.payload, "server echoed a different payload");
    }

    info!(latency_ms = latency.as_millis() as u64, "pong received");
    println!("{}", serde_json::to_string_pretty(&status.status)?);
    println!("latency: {}ms", latency.as_millis());

    Ok(())
}
