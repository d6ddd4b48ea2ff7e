//! The connection state machine.
//!
//! A [`Connection`] wraps one TCP stream and runs the protocol's outer
//! loop for either role: framing (with compression once negotiated),
//! transparent AES-CFB8 once the encryption handshake completes, the
//! Handshake → Status/Login → Play state progression, keep-alive, and
//! disconnect. Packets the state machine does not recognize flow through
//! untyped, as raw payload bytes.
//!
//! All inbound bytes are processed by a single spawned reader task, which
//! also performs cipher swaps; this keeps frame decoding and decryption
//! free of mid-stream races. Outbound writes serialize behind an async
//! mutex that owns the write half and the write-side cipher.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::Rng;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex as AsyncMutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use basalt_mc::framing::{decode_frame, encode_frame};
use basalt_mc::ids::{LOGIN_DISCONNECT, LOGIN_ENCRYPTION, LOGIN_SET_COMPRESSION, LOGIN_SUCCESS};
use basalt_mc::packets::{
    EncryptionRequest, EncryptionResponse, Handshake, KeepAlive, LoginDisconnect, LoginSuccess,
    PlayDisconnect, SetCompression,
};
use basalt_mc::{ConnectionState, PacketIds, PacketReader, ProtocolError};

use crate::auth::{MojangSessionService, SessionService};
use crate::crypto::{self, Cfb8Cipher, SHARED_SECRET_SIZE, ServerKeys};
use crate::dns;
use crate::error::{ConnectionError, Result};

/// Connection options, immutable after construction.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Whether this end accepted the connection (responder role).
    pub is_server: bool,
    /// Access token for session registration (client, online mode).
    pub access_token: Option<String>,
    /// Profile id for session registration (client, online mode).
    pub profile: Option<String>,
    /// Whether to run the keep-alive machinery (probes as server, echoes
    /// as client).
    pub keep_alive: bool,
    /// How long a peer may go unresponsive before it is kicked. Probes go
    /// out every fifth of this.
    pub kick_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            is_server: false,
            access_token: None,
            profile: None,
            keep_alive: true,
            kick_timeout: Duration::from_secs(30),
        }
    }
}

type PacketCallback = Arc<dyn Fn(&Bytes) + Send + Sync>;
type LoginCallback = Arc<dyn Fn(&LoginSuccess) + Send + Sync>;
type DisconnectCallback = Arc<dyn Fn(&serde_json::Value) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    packet: Option<PacketCallback>,
    login: Option<LoginCallback>,
    disconnect: Option<DisconnectCallback>,
    error: Option<ErrorCallback>,
}

/// How many dispatched packets the inbound FIFO holds for late
/// `next_packet` calls. Once full, the oldest already-delivered entry is
/// dropped; packets retained by [`Connection::pause`] are never dropped.
const PACKET_BACKLOG: usize = 64;

/// A packet held in the inbound FIFO until a `next_packet` call takes it.
struct QueuedPacket {
    bytes: Bytes,
    /// Whether the packet callback has already seen this packet. Packets
    /// queued while paused are undelivered until resume.
    delivered: bool,
}

struct EncryptionOutcome {
    secret: [u8; SHARED_SECRET_SIZE],
    session_hash: String,
}

/// Responder-side handshake state between sending the request and
/// receiving the response.
struct PendingEncryption {
    server_id: String,
    verify_token: [u8; 4],
    keys: Arc<ServerKeys>,
    tx: oneshot::Sender<Result<EncryptionOutcome>>,
}

struct Inner {
    state: ConnectionState,
    compression_threshold: i32,
    protocol_version: Option<i32>,
    ids: Option<PacketIds>,
    latency: Option<Duration>,
    paused: bool,
    closed: bool,
    fatal: Option<Arc<ConnectionError>>,
    queue: VecDeque<QueuedPacket>,
    pending_encryption: Option<PendingEncryption>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Handshake,
            compression_threshold: -1,
            protocol_version: None,
            ids: None,
            latency: None,
            paused: false,
            closed: false,
            fatal: None,
            queue: VecDeque::new(),
            pending_encryption: None,
        }
    }
}

struct WriteState {
    half: Option<OwnedWriteHalf>,
    cipher: Option<Cfb8Cipher>,
}

struct Shared {
    config: ConnectionConfig,
    session: Arc<dyn SessionService>,
    inner: Mutex<Inner>,
    writer: AsyncMutex<WriteState>,
    handlers: Mutex<Handlers>,
    packet_notify: Notify,
    shutdown: Notify,
    reader_handle: Mutex<Option<JoinHandle<OwnedReadHalf>>>,
}

/// Reader-task state: the stream buffer and the read-side cipher.
struct ReaderState {
    buf: BytesMut,
    decipher: Option<Cfb8Cipher>,
}

impl ReaderState {
    fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            decipher: None,
        }
    }
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes
}

fn frame_id(bytes: &Bytes) -> Option<i32> {
    PacketReader::new(bytes.clone()).ok().map(|reader| reader.id)
}

/// One end of a Minecraft protocol connection.
///
/// Cheap to clone; all clones share the same underlying stream and state.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Wrap an established stream, talking to Mojang's session server
    /// when the encryption handshake needs it.
    #[must_use]
    pub fn new(stream: TcpStream, config: ConnectionConfig) -> Self {
        Self::with_session_service(stream, config, Arc::new(MojangSessionService::default()))
    }

    /// Wrap an established stream with a custom session authority.
    #[must_use]
    pub fn with_session_service(
        stream: TcpStream,
        config: ConnectionConfig,
        session: Arc<dyn SessionService>,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            config,
            session,
            inner: Mutex::new(Inner::new()),
            writer: AsyncMutex::new(WriteState {
                half: Some(write_half),
                cipher: None,
            }),
            handlers: Mutex::new(Handlers::default()),
            packet_notify: Notify::new(),
            shutdown: Notify::new(),
            reader_handle: Mutex::new(None),
        });

        let conn = Self { shared };
        let handle = tokio::spawn(run_reader(conn.clone(), read_half));
        *conn.shared.reader_handle.lock().unwrap() = Some(handle);
        conn
    }

    /// Open a connection to a server.
    ///
    /// Without an explicit `port` the `_minecraft._tcp` SRV record is
    /// consulted, falling back to 25565.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ConnectFailed`] if the TCP connection
    /// cannot be established.
    pub async fn connect(host: &str, port: Option<u16>, config: ConnectionConfig) -> Result<Self> {
        let (host, port) = dns::resolve_server_address(host, port).await;
        info!(%host, port, "connecting");

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(ConnectionError::ConnectFailed)?;
        let _ = stream.set_nodelay(true);

        Ok(Self::new(stream, config))
    }

    /// The current protocol state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().unwrap().state
    }

    /// The protocol version, once a handshake fixed it.
    #[must_use]
    pub fn protocol_version(&self) -> Option<i32> {
        self.shared.inner.lock().unwrap().protocol_version
    }

    /// The most recent keep-alive round-trip time (server role).
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.shared.inner.lock().unwrap().latency
    }

    /// Register the callback invoked for every dispatched inbound packet.
    pub fn on_packet(&self, callback: impl Fn(&Bytes) + Send + Sync + 'static) {
        self.shared.handlers.lock().unwrap().packet = Some(Arc::new(callback));
    }

    /// Register the callback invoked when login completes.
    pub fn on_login(&self, callback: impl Fn(&LoginSuccess) + Send + Sync + 'static) {
        self.shared.handlers.lock().unwrap().login = Some(Arc::new(callback));
    }

    /// Register the callback invoked with the peer's disconnect reason.
    pub fn on_disconnect(&self, callback: impl Fn(&serde_json::Value) + Send + Sync + 'static) {
        self.shared.handlers.lock().unwrap().disconnect = Some(Arc::new(callback));
    }

    /// Register the callback invoked when the connection fails fatally.
    pub fn on_error(&self, callback: impl Fn(&ConnectionError) + Send + Sync + 'static) {
        self.shared.handlers.lock().unwrap().error = Some(Arc::new(callback));
    }

    /// Send one packet (id varint plus payload, unframed).
    ///
    /// Sending the handshake as a client advances the protocol state
    /// immediately; sending login-success as a server enters Play and
    /// starts the keep-alive loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn send(&self, packet: impl Into<Bytes>) -> Result<()> {
        let bytes = packet.into();
        self.before_send(&bytes);
        self.send_raw(&bytes).await?;
        self.after_send(&bytes);
        Ok(())
    }

    /// Wait for the next inbound packet, FIFO.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection closes or fails while
    /// waiting.
    pub async fn next_packet(&self) -> Result<Bytes> {
        self.next_matching(|_| true).await
    }

    /// Wait for the next inbound packet with the given id.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection closes or fails while
    /// waiting.
    pub async fn next_packet_with_id(&self, id: i32) -> Result<Bytes> {
        self.next_matching(move |packet_id| packet_id == id).await
    }

    async fn next_matching(&self, pred: impl Fn(i32) -> bool) -> Result<Bytes> {
        loop {
            let notified = self.shared.packet_notify.notified();
            tokio::pin!(notified);
            {
                let mut inner = self.shared.inner.lock().unwrap();
                if !inner.paused {
                    let position = inner
                        .queue
                        .iter()
                        .position(|packet| frame_id(&packet.bytes).is_some_and(|id| pred(id)));
                    if let Some(position) = position {
                        // remove() is only None past the end
                        if let Some(packet) = inner.queue.remove(position) {
                            return Ok(packet.bytes);
                        }
                    }
                }
                if let Some(err) = &inner.fatal {
                    return Err(ConnectionError::Lost(err.clone()));
                }
                if inner.closed {
                    return Err(ConnectionError::Closed);
                }
                notified.as_mut().enable();
            }
            notified.await;
        }
    }

    /// Stop dispatching inbound packets. Arrivals are retained, in order,
    /// until [`Connection::resume`].
    pub fn pause(&self) {
        self.shared.inner.lock().unwrap().paused = true;
        debug!("inbound dispatch paused");
    }

    /// Resume dispatch: every packet retained while paused goes through
    /// the packet callback exactly once, in arrival order, then waiters
    /// are woken.
    pub fn resume(&self) {
        let (retained, callback) = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.paused = false;
            let mut retained = Vec::new();
            for packet in &mut inner.queue {
                if !packet.delivered {
                    packet.delivered = true;
                    retained.push(packet.bytes.clone());
                }
            }
            (retained, self.shared.handlers.lock().unwrap().packet.clone())
        };

        debug!(packets = retained.len(), "inbound dispatch resumed");
        if let Some(callback) = &callback {
            for bytes in &retained {
                callback(bytes);
            }
        }
        self.shared.packet_notify.notify_waiters();
    }

    /// Disconnect the peer.
    ///
    /// With a reason (a JSON chat component) a disconnect packet goes out
    /// first, using the login-disconnect id (0x00) outside Play and the
    /// version-resolved disconnect id in Play. Without a reason the
    /// stream closes without a farewell packet.
    ///
    /// # Errors
    ///
    /// Returns an error if the disconnect packet cannot be written; the
    /// stream is closed regardless.
    pub async fn disconnect(&self, reason: Option<serde_json::Value>) -> Result<()> {
        let sent = match reason {
            Some(reason) => {
                let (state, ids) = {
                    let inner = self.shared.inner.lock().unwrap();
                    (inner.state, inner.ids)
                };
                let packet = match (state, ids) {
                    (ConnectionState::Play, Some(ids)) => {
                        PlayDisconnect::new(reason).encode(ids.disconnect)
                    }
                    _ => LoginDisconnect::new(reason).encode(),
                };
                self.send_raw(&packet).await
            }
            None => Ok(()),
        };
        self.close().await;
        sent
    }

    /// Apply a compression threshold to both directions of local framing.
    ///
    /// On a server connection the peer is told first: SetCompression goes
    /// out under the old framing, then the threshold takes effect. A
    /// client call only adjusts local state, for when the negotiation
    /// happened out of band.
    ///
    /// # Errors
    ///
    /// Returns an error if the SetCompression write fails.
    pub async fn set_compression(&self, threshold: i32) -> Result<()> {
        if self.shared.config.is_server {
            let packet = SetCompression::new(threshold).encode();
            let mut writer = self.shared.writer.lock().await;
            self.write_frame(&mut writer, &packet).await?;
            self.shared.inner.lock().unwrap().compression_threshold = threshold;
        } else {
            self.shared.inner.lock().unwrap().compression_threshold = threshold;
        }
        debug!(threshold, "compression threshold set");
        Ok(())
    }

    /// Run the responder side of the encryption handshake (server role).
    ///
    /// Sends the encryption request, awaits the response, verifies the
    /// token and the peer's session, and switches both directions to
    /// AES-CFB8.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::VerifyTokenMismatch`] when the token
    /// comes back wrong and [`ConnectionError::SessionNotJoinable`] when
    /// the session authority does not know the user; either way the
    /// connection is terminated.
    pub async fn encrypt(&self, keys: Arc<ServerKeys>, username: &str) -> Result<()> {
        if !self.shared.config.is_server {
            return Err(ConnectionError::WrongRole);
        }

        let id_bytes = random_bytes::<4>();
        let server_id: String = id_bytes.iter().map(|b| format!("{b:02x}")).collect();
        let verify_token = random_bytes::<4>();

        let request = EncryptionRequest {
            server_id: server_id.clone(),
            public_key: keys.public_key_der(),
            verify_token: Bytes::copy_from_slice(&verify_token),
        };

        let (tx, rx) = oneshot::channel();
        self.shared.inner.lock().unwrap().pending_encryption = Some(PendingEncryption {
            server_id,
            verify_token,
            keys,
            tx,
        });
        self.send_raw(&request.encode()).await?;

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.closed_error()),
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "encryption handshake failed");
                let _ = self.disconnect(None).await;
                return Err(err);
            }
        };

        // The peer already encrypts everything after its response, so the
        // write side switches over before the session check; even a
        // rejection notice has to go out ciphered.
        {
            let mut writer = self.shared.writer.lock().await;
            writer.cipher = Some(Cfb8Cipher::new(&outcome.secret));
        }

        match self.shared.session.has_joined(username, &outcome.session_hash).await {
            Ok(true) => {
                info!(username, "encryption enabled");
                Ok(())
            }
            Ok(false) => {
                warn!(username, "session not verified");
                let _ = self
                    .disconnect(Some(
                        json!({"translate": "multiplayer.disconnect.unverified_username"}),
                    ))
                    .await;
                Err(ConnectionError::SessionNotJoinable)
            }
            Err(err) => {
                let _ = self.disconnect(None).await;
                Err(err)
            }
        }
    }

    /// Detach from the stream without closing it, handing back the raw
    /// halves. Pending waiters are released with an error.
    ///
    /// Returns `None` when the stream is already gone (closed or failed).
    pub async fn destroy(self) -> Option<(OwnedReadHalf, OwnedWriteHalf)> {
        let already_closed = {
            let mut inner = self.shared.inner.lock().unwrap();
            let already = inner.closed;
            inner.closed = true;
            inner.pending_encryption = None;
            already
        };

        self.shared.shutdown.notify_one();
        self.shared.packet_notify.notify_waiters();

        let handle = self.shared.reader_handle.lock().unwrap().take();
        let read_half = match handle {
            Some(handle) => handle.await.ok(),
            None => None,
        };
        let write_half = self.shared.writer.lock().await.half.take();

        if already_closed {
            return None;
        }
        match (read_half, write_half) {
            (Some(read_half), Some(write_half)) => Some((read_half, write_half)),
            _ => None,
        }
    }

    fn closed_error(&self) -> ConnectionError {
        let inner = self.shared.inner.lock().unwrap();
        match &inner.fatal {
            Some(err) => ConnectionError::Lost(err.clone()),
            None => ConnectionError::Closed,
        }
    }

    /// Close the stream and release everything waiting on it. Idempotent.
    async fn close(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.pending_encryption = None;
        }

        self.shared.shutdown.notify_one();
        let mut writer = self.shared.writer.lock().await;
        if let Some(mut half) = writer.half.take() {
            let _ = half.shutdown().await;
        }
        drop(writer);
        self.shared.packet_notify.notify_waiters();
        debug!("connection closed");
    }

    /// Record a fatal error, surface it, and tear the connection down.
    async fn fatal(&self, err: ConnectionError) {
        tracing::error!(error = %err, "fatal connection error");
        let arc = Arc::new(err);
        let callback = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.fatal.is_none() {
                inner.fatal = Some(arc.clone());
            }
            inner.pending_encryption = None;
            self.shared.handlers.lock().unwrap().error.clone()
        };

        if let Some(callback) = &callback {
            callback(&arc);
        }
        self.close().await;
    }

    async fn send_raw(&self, payload: &[u8]) -> Result<()> {
        let mut writer = self.shared.writer.lock().await;
        self.write_frame(&mut writer, payload).await
    }

    async fn write_frame(&self, writer: &mut WriteState, payload: &[u8]) -> Result<()> {
        let threshold = self.shared.inner.lock().unwrap().compression_threshold;
        let mut frame = BytesMut::with_capacity(payload.len() + 8);
        encode_frame(payload, threshold, &mut frame)?;

        if let Some(cipher) = writer.cipher.as_mut() {
            cipher.encrypt(&mut frame);
        }
        let Some(half) = writer.half.as_mut() else {
            return Err(self.closed_error());
        };
        half.write_all(&frame).await?;
        Ok(())
    }

    /// Client-side: the first packet is the handshake, which fixes the
    /// protocol version and the next state before anything is written.
    fn before_send(&self, bytes: &Bytes) {
        if self.shared.config.is_server {
            return;
        }
        if self.shared.inner.lock().unwrap().state != ConnectionState::Handshake {
            return;
        }
        let Ok(mut reader) = PacketReader::new(bytes.clone()) else {
            return;
        };
        match Handshake::decode(&mut reader) {
            Ok(handshake) => {
                let mut inner = self.shared.inner.lock().unwrap();
                inner.protocol_version = Some(handshake.protocol_version);
                inner.ids = Some(PacketIds::for_protocol(handshake.protocol_version));
                inner.state = handshake.next_state.into();
                debug!(
                    version = handshake.protocol_version,
                    state = ?inner.state,
                    "handshake sent"
                );
            }
            Err(err) => debug!(error = %err, "first packet was not a handshake"),
        }
    }

    /// Server-side: sending login-success enters Play and starts the
    /// keep-alive loop.
    fn after_send(&self, bytes: &Bytes) {
        if !self.shared.config.is_server {
            return;
        }
        let Some(id) = frame_id(bytes) else { return };
        let entered_play = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state == ConnectionState::Login && id == LOGIN_SUCCESS {
                inner.state = ConnectionState::Play;
                true
            } else {
                false
            }
        };
        if !entered_play {
            return;
        }

        info!("login complete, entering play");
        let callback = self.shared.handlers.lock().unwrap().login.clone();
        if let Some(callback) = &callback {
            if let Ok(mut reader) = PacketReader::new(bytes.clone()) {
                if let Ok(success) = LoginSuccess::decode(&mut reader) {
                    callback(&success);
                }
            }
        }
        if self.shared.config.keep_alive {
            tokio::spawn(run_keep_alive(self.clone()));
        }
    }

    async fn process_buffer(&self, state: &mut ReaderState) -> Result<()> {
        loop {
            let threshold = self.shared.inner.lock().unwrap().compression_threshold;
            match decode_frame(&mut state.buf, threshold)? {
                Some(frame) => self.handle_frame(frame, state).await?,
                None => return Ok(()),
            }
        }
    }

    async fn handle_frame(&self, frame: Bytes, state: &mut ReaderState) -> Result<()> {
        let id = PacketReader::new(frame.clone())?.id;
        debug!(id, len = frame.len(), "packet received");

        // Dispatch: queue, packet callback, waiters.
        let (paused, callback) = {
            let mut inner = self.shared.inner.lock().unwrap();
            let paused = inner.paused;
            while inner.queue.len() >= PACKET_BACKLOG {
                let Some(oldest) = inner.queue.iter().position(|packet| packet.delivered) else {
                    break;
                };
                inner.queue.remove(oldest);
            }
            inner.queue.push_back(QueuedPacket {
                bytes: frame.clone(),
                delivered: !paused,
            });
            let callback = if paused {
                None
            } else {
                self.shared.handlers.lock().unwrap().packet.clone()
            };
            (paused, callback)
        };
        if !paused {
            if let Some(callback) = &callback {
                callback(&frame);
            }
            self.shared.packet_notify.notify_waiters();
        }

        // State bookkeeping runs regardless of pause.
        let (conn_state, ids) = {
            let inner = self.shared.inner.lock().unwrap();
            (inner.state, inner.ids)
        };

        if self.shared.config.is_server {
            match conn_state {
                ConnectionState::Handshake => self.receive_handshake(frame)?,
                ConnectionState::Login if id == LOGIN_ENCRYPTION => {
                    let pending = self.shared.inner.lock().unwrap().pending_encryption.take();
                    if let Some(pending) = pending {
                        self.finish_encryption(frame, pending, state);
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match conn_state {
            ConnectionState::Login => match id {
                LOGIN_DISCONNECT => {
                    let mut reader = PacketReader::new(frame)?;
                    let packet = LoginDisconnect::decode(&mut reader)?;
                    info!(reason = %packet.reason, "disconnected during login");
                    let callback = self.shared.handlers.lock().unwrap().disconnect.clone();
                    if let Some(callback) = &callback {
                        callback(&packet.reason);
                    }
                    self.close().await;
                }
                LOGIN_ENCRYPTION => self.answer_encryption_request(frame, state).await?,
                LOGIN_SUCCESS => {
                    let mut reader = PacketReader::new(frame)?;
                    let success = LoginSuccess::decode(&mut reader)?;
                    self.shared.inner.lock().unwrap().state = ConnectionState::Play;
                    info!(username = %success.username, "login complete, entering play");
                    let callback = self.shared.handlers.lock().unwrap().login.clone();
                    if let Some(callback) = &callback {
                        callback(&success);
                    }
                }
                LOGIN_SET_COMPRESSION => {
                    let mut reader = PacketReader::new(frame)?;
                    let packet = SetCompression::decode(&mut reader)?;
                    self.shared.inner.lock().unwrap().compression_threshold = packet.threshold;
                    debug!(threshold = packet.threshold, "compression enabled");
                }
                _ => {}
            },
            ConnectionState::Play => {
                let Some(ids) = ids else { return Ok(()) };
                if id == ids.keep_alive_clientbound && self.shared.config.keep_alive {
                    let mut reader = PacketReader::new(frame)?;
                    let probe = KeepAlive::decode(&mut reader)?;
                    self.send_raw(&probe.encode(ids.keep_alive_serverbound)).await?;
                } else if id == ids.disconnect {
                    let mut reader = PacketReader::new(frame)?;
                    let packet = PlayDisconnect::decode(&mut reader, ids.disconnect)?;
                    info!(reason = %packet.reason, "disconnected by server");
                    let callback = self.shared.handlers.lock().unwrap().disconnect.clone();
                    if let Some(callback) = &callback {
                        callback(&packet.reason);
                    }
                    self.close().await;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Server-side: the first inbound packet is the handshake.
    fn receive_handshake(&self, frame: Bytes) -> Result<()> {
        let mut reader = PacketReader::new(frame)?;
        let handshake = Handshake::decode(&mut reader)?;
        let mut inner = self.shared.inner.lock().unwrap();
        inner.protocol_version = Some(handshake.protocol_version);
        inner.ids = Some(PacketIds::for_protocol(handshake.protocol_version));
        inner.state = handshake.next_state.into();
        debug!(
            version = handshake.protocol_version,
            state = ?inner.state,
            "handshake received"
        );
        Ok(())
    }

    /// Client-side encryption handshake, run inline on the reader task.
    async fn answer_encryption_request(&self, frame: Bytes, state: &mut ReaderState) -> Result<()> {
        let mut reader = PacketReader::new(frame)?;
        let request = EncryptionRequest::decode(&mut reader)?;

        let public_key = crypto::public_key_from_der(&request.public_key)?;
        let secret = crypto::generate_shared_secret();
        let hash = crypto::session_hash(&request.server_id, &secret, &request.public_key);

        let config = &self.shared.config;
        if let (Some(token), Some(profile)) = (&config.access_token, &config.profile) {
            self.shared.session.join_session(token, profile, &hash).await?;
        }

        let response = EncryptionResponse {
            shared_secret: crypto::rsa_encrypt(&public_key, &secret)?.into(),
            verify_token: crypto::rsa_encrypt(&public_key, &request.verify_token)?.into(),
        };

        // The response itself goes out in the clear; everything after it
        // is encrypted, so the cipher install shares the write lock.
        let mut writer = self.shared.writer.lock().await;
        self.write_frame(&mut writer, &response.encode()).await?;
        writer.cipher = Some(Cfb8Cipher::new(&secret));
        drop(writer);

        state.decipher = Some(Cfb8Cipher::new(&secret));
        debug!("encryption enabled");
        Ok(())
    }

    /// Server-side completion of the encryption handshake, run on the
    /// reader task so the cipher swap cannot race frame decoding.
    fn finish_encryption(
        &self,
        frame: Bytes,
        pending: PendingEncryption,
        state: &mut ReaderState,
    ) {
        let outcome = (|| -> Result<EncryptionOutcome> {
            let mut reader = PacketReader::new(frame)?;
            let response = EncryptionResponse::decode(&mut reader)?;

            let secret = pending.keys.decrypt(&response.shared_secret)?;
            let token = pending.keys.decrypt(&response.verify_token)?;
            if token.as_slice() != pending.verify_token.as_slice() {
                return Err(ConnectionError::VerifyTokenMismatch);
            }

            let secret: [u8; SHARED_SECRET_SIZE] = secret.try_into().map_err(|_| {
                ProtocolError::MalformedPayload("shared secret is not 16 bytes".to_string())
            })?;
            let session_hash = crypto::session_hash(
                &pending.server_id,
                &secret,
                &pending.keys.public_key_der(),
            );
            Ok(EncryptionOutcome {
                secret,
                session_hash,
            })
        })();

        match outcome {
            Ok(outcome) => {
                // The peer started encrypting right after the response, so
                // bytes already buffered behind it are ciphertext too.
                let mut decipher = Cfb8Cipher::new(&outcome.secret);
                decipher.decrypt(&mut state.buf[..]);
                state.decipher = Some(decipher);
                let _ = pending.tx.send(Ok(outcome));
            }
            Err(err) => {
                let _ = pending.tx.send(Err(err));
            }
        }
    }
}

/// The reader task: decrypts inbound chunks, decodes frames, and runs all
/// inbound dispatch. Returns the read half for [`Connection::destroy`].
async fn run_reader(conn: Connection, mut read_half: OwnedReadHalf) -> OwnedReadHalf {
    let mut state = ReaderState::new();
    loop {
        let start = state.buf.len();
        let read = tokio::select! {
            () = conn.shared.shutdown.notified() => break,
            read = read_half.read_buf(&mut state.buf) => read,
        };

        match read {
            Ok(0) => {
                debug!("peer closed the stream");
                conn.close().await;
                break;
            }
            Ok(_) => {
                if let Some(cipher) = state.decipher.as_mut() {
                    cipher.decrypt(&mut state.buf[start..]);
                }
                if let Err(err) = conn.process_buffer(&mut state).await {
                    conn.fatal(err).await;
                    break;
                }
            }
            Err(err) => {
                conn.fatal(ConnectionError::Stream(err)).await;
                break;
            }
        }
    }
    read_half
}

/// The server's keep-alive loop: a probe every fifth of the kick timeout,
/// then wait for the echo; a peer silent for the whole timeout is kicked.
async fn run_keep_alive(conn: Connection) {
    let kick_timeout = conn.shared.config.kick_timeout;
    let interval = kick_timeout / 5;
    debug!(?interval, "keep-alive loop started");

    loop {
        sleep(interval).await;

        let ids = {
            let inner = conn.shared.inner.lock().unwrap();
            if inner.closed || inner.fatal.is_some() {
                return;
            }
            match inner.ids {
                Some(ids) => ids,
                None => return,
            }
        };

        let probe = KeepAlive::new(random_bytes::<8>());
        let sent = Instant::now();
        if conn
            .send_raw(&probe.encode(ids.keep_alive_clientbound))
            .await
            .is_err()
        {
            return;
        }

        match timeout(
            kick_timeout,
            conn.next_packet_with_id(ids.keep_alive_serverbound),
        )
        .await
        {
            Ok(Ok(_echo)) => {
                let latency = sent.elapsed();
                conn.shared.inner.lock().unwrap().latency = Some(latency);
                debug!(?latency, "keep-alive echo");
            }
            Ok(Err(_)) => return,
            Err(_) => {
                warn!("keep-alive timed out, kicking peer");
                {
                    let mut inner = conn.shared.inner.lock().unwrap();
                    if inner.fatal.is_none() {
                        inner.fatal = Some(Arc::new(ConnectionError::TimeoutDisconnect));
                    }
                }
                let _ = conn
                    .disconnect(Some(json!({"translate": "disconnect.timeout"})))
                    .await;
                return;
            }
        }
    }
}
