//! Connection tests over real localhost TCP pairs.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;

use basalt::auth::{BoxFuture, SessionService};
use basalt::crypto::{self, ServerKeys};
use basalt::{Connection, ConnectionConfig, ConnectionError};
use basalt_mc::framing::{decode_frame, encode_frame};
use basalt_mc::packets::{
    EncryptionRequest, EncryptionResponse, Handshake, LoginSuccess, NextState, Packet, Ping, Pong,
    StatusRequest, StatusResponse,
};
use basalt_mc::{ConnectionState, PacketReader, PacketWriter};

/// Session authority with a fixed answer.
struct StaticSessionService {
    joined: bool,
}

impl SessionService for StaticSessionService {
    fn join_session<'a>(
        &'a self,
        _access_token: &'a str,
        _profile: &'a str,
        _server_hash: &'a str,
    ) -> BoxFuture<'a, basalt::Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn has_joined<'a>(
        &'a self,
        _username: &'a str,
        _server_hash: &'a str,
    ) -> BoxFuture<'a, basalt::Result<bool>> {
        let joined = self.joined;
        Box::pin(async move { Ok(joined) })
    }
}

fn client_config() -> ConnectionConfig {
    ConnectionConfig {
        keep_alive: false,
        ..ConnectionConfig::default()
    }
}

fn server_config() -> ConnectionConfig {
    ConnectionConfig {
        is_server: true,
        keep_alive: false,
        ..ConnectionConfig::default()
    }
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), async {
        listener.accept().await.unwrap().0
    });
    (client.unwrap(), accepted)
}

async fn pair(client_cfg: ConnectionConfig, server_cfg: ConnectionConfig) -> (Connection, Connection) {
    let service = Arc::new(StaticSessionService { joined: true });
    let (client_stream, server_stream) = tcp_pair().await;
    (
        Connection::with_session_service(client_stream, client_cfg, service.clone()),
        Connection::with_session_service(server_stream, server_cfg, service),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        sleep(Duration::from_millis(10)).await;
    }
}

fn handshake(next_state: NextState) -> Bytes {
    Handshake {
        protocol_version: 404,
        server_address: "localhost".to_string(),
        server_port: 25565,
        next_state,
    }
    .encode()
}

#[tokio::test]
async fn test_handshake_advances_both_ends() {
    let (client, server) = pair(client_config(), server_config()).await;

    client.send(handshake(NextState::Status)).await.unwrap();
    // The client side advances before the bytes even arrive.
    assert_eq!(client.state(), ConnectionState::Status);
    assert_eq!(client.protocol_version(), Some(404));

    let frame = server.next_packet().await.unwrap();
    let mut reader = PacketReader::new(frame).unwrap();
    let received = Handshake::decode(&mut reader).unwrap();
    assert_eq!(received.protocol_version, 404);
    assert_eq!(received.next_state, NextState::Status);
    assert_eq!(server.state(), ConnectionState::Status);
    assert_eq!(server.protocol_version(), Some(404));
}

#[tokio::test]
async fn test_status_ping_roundtrip() {
    let (client, server) = pair(client_config(), server_config()).await;

    client.send(handshake(NextState::Status)).await.unwrap();
    client.send(StatusRequest.encode()).await.unwrap();

    let frame = server.next_packet().await.unwrap();
    Handshake::decode(&mut PacketReader::new(frame).unwrap()).unwrap();
    let frame = server.next_packet_with_id(StatusRequest::ID).await.unwrap();
    StatusRequest::decode(&PacketReader::new(frame).unwrap()).unwrap();

    let status = json!({
        "version": {"name": "1.13.2", "protocol": 404},
        "players": {"max": 20, "online": 3},
        "description": {"text": "basalt test server"},
    });
    server
        .send(StatusResponse::new(status.clone()).encode())
        .await
        .unwrap();

    let frame = client.next_packet_with_id(StatusResponse::ID).await.unwrap();
    let response = StatusResponse::decode(&mut PacketReader::new(frame).unwrap()).unwrap();
    assert_eq!(response.status, status);

    client.send(Ping::new(7_777_777).encode()).await.unwrap();
    let frame = server.next_packet_with_id(Ping::ID).await.unwrap();
    let ping = Ping::decode(&mut PacketReader::new(frame).unwrap()).unwrap();
    server.send(Pong::new(ping.payload).encode()).await.unwrap();

    let frame = client.next_packet_with_id(Pong::ID).await.unwrap();
    let pong = Pong::decode(&mut PacketReader::new(frame).unwrap()).unwrap();
    assert_eq!(pong.payload, 7_777_777);
}

#[tokio::test]
async fn test_pause_retains_and_resume_delivers_once() {
    let (client, server) = pair(client_config(), server_config()).await;

    let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.on_packet(move |bytes| {
        let id = PacketReader::new(bytes.clone()).unwrap().id;
        sink.lock().unwrap().push(id);
    });

    client.pause();
    for id in [0x10, 0x11, 0x12] {
        server
            .send(PacketWriter::new(id).write_u8(0xaa).encode())
            .await
            .unwrap();
    }

    // Give the packets time to arrive; none may be dispatched yet.
    sleep(Duration::from_millis(200)).await;
    assert!(seen.lock().unwrap().is_empty());

    client.resume();
    wait_until(|| seen.lock().unwrap().len() == 3).await;
    assert_eq!(*seen.lock().unwrap(), vec![0x10, 0x11, 0x12]);

    // Later packets are dispatched exactly once, not replayed.
    server
        .send(PacketWriter::new(0x13).write_u8(0xbb).encode())
        .await
        .unwrap();
    wait_until(|| seen.lock().unwrap().len() == 4).await;
    assert_eq!(*seen.lock().unwrap(), vec![0x10, 0x11, 0x12, 0x13]);
}

#[tokio::test]
async fn test_dispatched_backlog_is_bounded() {
    let (client, server) = pair(client_config(), server_config()).await;

    let seen = Arc::new(Mutex::new(0usize));
    let sink = seen.clone();
    client.on_packet(move |_| *sink.lock().unwrap() += 1);

    // Well past the backlog cap, all consumed by the callback alone.
    let total: i32 = 80;
    for i in 0..total {
        server
            .send(PacketWriter::new(0x100 + i).write_u8(0).encode())
            .await
            .unwrap();
    }
    wait_until(|| *seen.lock().unwrap() == total as usize).await;

    // The oldest dispatched packets were dropped; a late wait starts at
    // the survivors, and the newest packet is still there.
    let frame = client.next_packet().await.unwrap();
    let id = PacketReader::new(frame).unwrap().id;
    assert!(id > 0x100, "oldest packet should have been dropped, got {id:#x}");
    client.next_packet_with_id(0x100 + total - 1).await.unwrap();
}

#[tokio::test]
async fn test_waiters_released_on_stream_close() {
    let (client, server) = pair(client_config(), server_config()).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.next_packet_with_id(0x7f).await }
    });

    sleep(Duration::from_millis(50)).await;
    server.disconnect(None).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter still blocked after close")
        .unwrap();
    assert!(matches!(result, Err(ConnectionError::Closed)));
}

#[tokio::test]
async fn test_compression_negotiation() {
    let (client, server) = pair(client_config(), server_config()).await;
    client.send(handshake(NextState::Login)).await.unwrap();

    server.set_compression(64).await.unwrap();

    // Well past the threshold, so this rides a zlib body.
    let text = "basalt ".repeat(300);
    server
        .send(PacketWriter::new(0x40).write_string(&text).encode())
        .await
        .unwrap();

    let frame = client.next_packet_with_id(0x40).await.unwrap();
    let mut reader = PacketReader::new(frame).unwrap();
    assert_eq!(reader.read_string().unwrap(), text);

    // The client picked up the threshold from SetCompression, so its own
    // writes are compressed too.
    client
        .send(PacketWriter::new(0x41).write_string(&text).encode())
        .await
        .unwrap();
    let frame = server.next_packet_with_id(0x41).await.unwrap();
    let mut reader = PacketReader::new(frame).unwrap();
    assert_eq!(reader.read_string().unwrap(), text);
}

#[tokio::test]
async fn test_client_set_compression_applies_locally() {
    let (client_stream, mut raw_server) = tcp_pair().await;
    let client = Connection::with_session_service(
        client_stream,
        client_config(),
        Arc::new(StaticSessionService { joined: true }),
    );

    // A client call does not emit SetCompression; it only switches the
    // local framing, for thresholds negotiated out of band.
    client.set_compression(64).await.unwrap();

    let text = "basalt ".repeat(100);
    client
        .send(PacketWriter::new(0x40).write_string(&text).encode())
        .await
        .unwrap();

    // The first frame on the wire is the data packet itself, already in
    // the compressed format.
    let mut buf = BytesMut::new();
    let frame = loop {
        if let Some(frame) = decode_frame(&mut buf, 64).unwrap() {
            break frame;
        }
        assert!(raw_server.read_buf(&mut buf).await.unwrap() > 0);
    };
    let mut reader = PacketReader::new(frame).unwrap();
    assert_eq!(reader.id, 0x40);
    assert_eq!(reader.read_string().unwrap(), text);
}

#[tokio::test]
async fn test_encryption_handshake() {
    let mut client_cfg = client_config();
    client_cfg.access_token = Some("token".to_string());
    client_cfg.profile = Some("069a79f444e94726a5befca90e38aaf5".to_string());
    let (client, server) = pair(client_cfg, server_config()).await;

    client.send(handshake(NextState::Login)).await.unwrap();

    let keys = Arc::new(ServerKeys::generate().unwrap());
    server.encrypt(keys, "Notch").await.unwrap();

    let logged_in = Arc::new(Mutex::new(None));
    let sink = logged_in.clone();
    client.on_login(move |success| {
        *sink.lock().unwrap() = Some(success.username.clone());
    });

    server
        .send(LoginSuccess::new("069a79f4-44e9-4726-a5be-fca90e38aaf5", "Notch").encode())
        .await
        .unwrap();
    assert_eq!(server.state(), ConnectionState::Play);

    wait_until(|| client.state() == ConnectionState::Play).await;
    assert_eq!(logged_in.lock().unwrap().as_deref(), Some("Notch"));

    // Both directions now run through the cipher.
    server
        .send(PacketWriter::new(0x42).write_string("sealed").encode())
        .await
        .unwrap();
    let frame = client.next_packet_with_id(0x42).await.unwrap();
    let mut reader = PacketReader::new(frame).unwrap();
    assert_eq!(reader.read_string().unwrap(), "sealed");

    client
        .send(PacketWriter::new(0x05).write_string("echoed back").encode())
        .await
        .unwrap();
    let frame = server.next_packet_with_id(0x05).await.unwrap();
    let mut reader = PacketReader::new(frame).unwrap();
    assert_eq!(reader.read_string().unwrap(), "echoed back");
}

async fn read_raw_frame(stream: &mut TcpStream, buf: &mut BytesMut) -> Bytes {
    loop {
        if let Some(frame) = decode_frame(buf, -1).unwrap() {
            return frame;
        }
        let read = stream.read_buf(buf).await.unwrap();
        assert!(read > 0, "stream closed while waiting for a frame");
    }
}

async fn write_raw_frame(stream: &mut TcpStream, payload: &[u8]) {
    let mut out = BytesMut::new();
    encode_frame(payload, -1, &mut out).unwrap();
    stream.write_all(&out).await.unwrap();
}

#[tokio::test]
async fn test_verify_token_mismatch_aborts_without_cipher() {
    let (mut raw_client, server_stream) = tcp_pair().await;
    let server = Connection::with_session_service(
        server_stream,
        server_config(),
        Arc::new(StaticSessionService { joined: true }),
    );

    write_raw_frame(&mut raw_client, &handshake(NextState::Login)).await;

    let keys = Arc::new(ServerKeys::generate().unwrap());
    let handshake_task = tokio::spawn({
        let server = server.clone();
        let keys = keys.clone();
        async move { server.encrypt(keys, "Notch").await }
    });

    let mut buf = BytesMut::new();
    let frame = read_raw_frame(&mut raw_client, &mut buf).await;
    let request = EncryptionRequest::decode(&mut PacketReader::new(frame).unwrap()).unwrap();

    let public_key = crypto::public_key_from_der(&request.public_key).unwrap();
    let secret = [7u8; 16];
    let mut wrong_token = request.verify_token.to_vec();
    wrong_token[0] ^= 0xff;

    let response = EncryptionResponse {
        shared_secret: crypto::rsa_encrypt(&public_key, &secret).unwrap().into(),
        verify_token: crypto::rsa_encrypt(&public_key, &wrong_token).unwrap().into(),
    };
    write_raw_frame(&mut raw_client, &response.encode()).await;

    let result = handshake_task.await.unwrap();
    assert!(matches!(result, Err(ConnectionError::VerifyTokenMismatch)));

    // No cipher was activated and no reason was given, so the stream
    // just ends without a disconnect packet.
    let mut tail = Vec::new();
    raw_client.read_to_end(&mut tail).await.unwrap();
    assert!(buf.is_empty());
    assert!(tail.is_empty());
}

#[tokio::test]
async fn test_disconnect_without_reason_closes_silently() {
    let (mut raw_client, server_stream) = tcp_pair().await;
    let server = Connection::with_session_service(
        server_stream,
        server_config(),
        Arc::new(StaticSessionService { joined: true }),
    );

    server.disconnect(None).await.unwrap();

    // Nothing goes on the wire; the peer sees a bare EOF.
    let mut tail = Vec::new();
    raw_client.read_to_end(&mut tail).await.unwrap();
    assert!(tail.is_empty());
}

#[tokio::test]
async fn test_unverified_session_disconnects() {
    let service = Arc::new(StaticSessionService { joined: false });
    let (client_stream, server_stream) = tcp_pair().await;
    let mut client_cfg = client_config();
    client_cfg.access_token = Some("token".to_string());
    client_cfg.profile = Some("profile".to_string());
    let client = Connection::with_session_service(client_stream, client_cfg, service.clone());
    let server = Connection::with_session_service(server_stream, server_config(), service);

    let reason = Arc::new(Mutex::new(None));
    let sink = reason.clone();
    client.on_disconnect(move |value| {
        *sink.lock().unwrap() = Some(value.clone());
    });

    client.send(handshake(NextState::Login)).await.unwrap();

    let keys = Arc::new(ServerKeys::generate().unwrap());
    let result = server.encrypt(keys, "Notch").await;
    assert!(matches!(result, Err(ConnectionError::SessionNotJoinable)));

    wait_until(|| reason.lock().unwrap().is_some()).await;
    let reason = reason.lock().unwrap().clone().unwrap();
    assert_eq!(reason["translate"], "multiplayer.disconnect.unverified_username");
}

#[tokio::test]
async fn test_keep_alive_echo_records_latency() {
    let client_cfg = ConnectionConfig::default();
    let server_cfg = ConnectionConfig {
        is_server: true,
        kick_timeout: Duration::from_millis(500),
        ..ConnectionConfig::default()
    };
    let (client, server) = pair(client_cfg, server_cfg).await;

    client.send(handshake(NextState::Login)).await.unwrap();
    wait_until(|| server.state() == ConnectionState::Login).await;

    server
        .send(LoginSuccess::new("069a79f4-44e9-4726-a5be-fca90e38aaf5", "Notch").encode())
        .await
        .unwrap();
    wait_until(|| client.state() == ConnectionState::Play).await;

    wait_until(|| server.latency().is_some()).await;
    assert!(server.latency().unwrap() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_keep_alive_timeout_kicks_silent_peer() {
    // The client never echoes, so the server gives up after the kick
    // timeout and sends a structured disconnect.
    let client_cfg = client_config();
    let server_cfg = ConnectionConfig {
        is_server: true,
        kick_timeout: Duration::from_millis(300),
        ..ConnectionConfig::default()
    };
    let (client, server) = pair(client_cfg, server_cfg).await;

    let reason = Arc::new(Mutex::new(None));
    let sink = reason.clone();
    client.on_disconnect(move |value| {
        *sink.lock().unwrap() = Some(value.clone());
    });

    client.send(handshake(NextState::Login)).await.unwrap();
    wait_until(|| server.state() == ConnectionState::Login).await;
    server
        .send(LoginSuccess::new("069a79f4-44e9-4726-a5be-fca90e38aaf5", "Notch").encode())
        .await
        .unwrap();

    wait_until(|| reason.lock().unwrap().is_some()).await;
    let reason = reason.lock().unwrap().clone().unwrap();
    assert_eq!(reason["translate"], "disconnect.timeout");

    // Pending and future waits surface the failure.
    let err = server.next_packet_with_id(0x7f).await.unwrap_err();
    assert!(matches!(
        err,
        ConnectionError::Lost(ref inner) if matches!(**inner, ConnectionError::TimeoutDisconnect)
    ));
}

#[tokio::test]
async fn test_destroy_hands_back_the_stream() {
    let (client, _server) = pair(client_config(), server_config()).await;

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { client.next_packet().await }
    });
    sleep(Duration::from_millis(50)).await;

    let halves = client.destroy().await;
    let (_read_half, mut write_half) = halves.expect("stream should be handed back");

    // The socket is still open; raw writes go through.
    write_half.write_all(b"raw bytes").await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("waiter still blocked after destroy")
        .unwrap();
    assert!(matches!(result, Err(ConnectionError::Closed)));
}
