//! UDP → TCP topic relay broker.
//!
//! A single task owns every socket and the session table. Each turn of the
//! loop waits for whichever source is ready first:
//!
//! - a line of admin input (`exit` shuts the broker down),
//! - a new TCP connection,
//! - a producer datagram,
//! - a record from any open TCP connection,
//! - a handshake deadline.
//!
//! `tokio::select!` polls the sources in random order, so a busy source
//! cannot starve the others. Reads are framed by [`RecordCodec`] and never
//! block the loop; writes are bounded by the configured write timeout.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use bytes::BytesMut;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt, StreamMap};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{self, DATAGRAM_LEN, Datagram, MAX_ID_LEN, Packet};
use crate::session::{ConnId, ConnectOutcome, SessionTable};
use crate::topic;
use crate::transport::{self, RecordCodec};

/// Default write deadline per record.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time a new connection has to send CONNECT.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Broker configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Write deadline per record, in milliseconds. A subscriber that cannot
    /// take a record within this time is disconnected.
    pub write_timeout_ms: u64,
    /// Time a new connection has to complete the CONNECT handshake, in
    /// milliseconds.
    pub handshake_timeout_ms: u64,
    /// Set `TCP_NODELAY` on accepted connections.
    pub nodelay: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT.as_millis() as u64,
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            nodelay: true,
        }
    }
}

impl BrokerConfig {
    /// Create a new broker config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-record write deadline.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the handshake deadline.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Enable or disable `TCP_NODELAY` on accepted connections.
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Check that every timeout is non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.write_timeout_ms == 0 {
            return Err(Error::InvalidConfig("write_timeout_ms must be positive".to_string()));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Error::InvalidConfig("handshake_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    fn handshake_deadline(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Framed reads of one connection; yields `None` once when the peer is gone.
type RecordStream = Pin<Box<dyn Stream<Item = Option<Result<BytesMut>>> + Send>>;

fn record_stream(reader: OwnedReadHalf) -> RecordStream {
    Box::pin(
        FramedRead::new(reader, RecordCodec::packets())
            .map(Some)
            .chain(tokio_stream::once(None)),
    )
}

/// Accepted connection that has not sent CONNECT yet.
struct Pending {
    addr: SocketAddr,
    deadline: Instant,
}

/// One thing the loop has to react to.
enum Event {
    Admin(io::Result<Option<String>>),
    Accept(io::Result<(TcpStream, SocketAddr)>),
    Datagram(io::Result<(usize, SocketAddr)>),
    /// A record from a connection, or `None` when it closed.
    Record(ConnId, Option<Result<BytesMut>>),
    HandshakeExpired,
}

/// Whether the loop keeps going after an admin command.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// The relay broker.
pub struct Broker {
    config: BrokerConfig,
    listener: TcpListener,
    udp: UdpSocket,
    udp_buf: Vec<u8>,
    sessions: SessionTable,
    readers: StreamMap<ConnId, RecordStream>,
    writers: HashMap<ConnId, OwnedWriteHalf>,
    pending: HashMap<ConnId, Pending>,
    next_conn: u64,
}

impl Broker {
    /// Create a broker over an already listening TCP socket and an already
    /// bound UDP socket.
    pub fn new(listener: TcpListener, udp: UdpSocket, config: BrokerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            listener,
            udp,
            udp_buf: vec![0u8; DATAGRAM_LEN],
            sessions: SessionTable::new(),
            readers: StreamMap::new(),
            writers: HashMap::new(),
            pending: HashMap::new(),
            next_conn: 0,
        })
    }

    /// Address subscribers connect to.
    pub fn tcp_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Address producers send to.
    pub fn udp_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Session state, for inspection.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Serve until `exit` is read from `admin`.
    ///
    /// Returns an error only if the listener or the UDP socket fails. If
    /// `admin` reaches end of input the broker keeps serving.
    pub async fn run<R: AsyncBufRead + Unpin>(mut self, admin: R) -> Result<()> {
        info!(
            "Broker listening on tcp {} and udp {}",
            self.listener.local_addr()?,
            self.udp.local_addr()?
        );

        let mut admin = admin.lines();
        let mut admin_open = true;

        loop {
            let next_deadline = self.pending.values().map(|p| p.deadline).min();

            let event = tokio::select! {
                line = admin.next_line(), if admin_open => Event::Admin(line),
                accepted = self.listener.accept() => Event::Accept(accepted),
                received = self.udp.recv_from(&mut self.udp_buf) => Event::Datagram(received),
                Some((conn, record)) = self.readers.next(), if !self.readers.is_empty() => {
                    Event::Record(conn, record)
                }
                _ = tokio::time::sleep_until(next_deadline.unwrap_or_else(Instant::now)),
                    if next_deadline.is_some() => Event::HandshakeExpired,
            };

            match event {
                Event::Admin(Ok(Some(line))) => {
                    if self.handle_admin(&line).await == Flow::Exit {
                        return Ok(());
                    }
                }
                Event::Admin(Ok(None)) => {
                    debug!("Admin input closed");
                    admin_open = false;
                }
                Event::Admin(Err(e)) => {
                    warn!("Admin input failed: {}", e);
                    admin_open = false;
                }
                Event::Accept(accepted) => {
                    let (stream, addr) = accepted?;
                    self.handle_accept(stream, addr);
                }
                Event::Datagram(received) => {
                    let (len, from) = received?;
                    self.handle_datagram(len, from).await;
                }
                Event::Record(conn, Some(Ok(record))) => self.handle_record(conn, &record).await,
                Event::Record(conn, Some(Err(e))) => {
                    if e.is_disconnect() {
                        debug!("{} dropped: {}", conn, e);
                    } else {
                        warn!("Read from {} failed: {}", conn, e);
                    }
                    self.disconnect(conn).await;
                }
                Event::Record(conn, None) => {
                    trace!("{} closed by peer", conn);
                    self.disconnect(conn).await;
                }
                Event::HandshakeExpired => self.expire_handshakes().await,
            }
        }
    }

    async fn handle_admin(&mut self, line: &str) -> Flow {
        match line.trim() {
            "exit" => {
                self.shutdown().await;
                Flow::Exit
            }
            "" => Flow::Continue,
            other => {
                warn!("Invalid command: {}", other);
                Flow::Continue
            }
        }
    }

    /// Start monitoring a new connection; its first record must be CONNECT.
    fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        debug!("Accepted connection from {} as {}", addr, conn);

        let (reader, writer) = stream.into_split();
        self.readers.insert(conn, record_stream(reader));
        self.writers.insert(conn, writer);
        self.pending.insert(
            conn,
            Pending {
                addr,
                deadline: Instant::now() + self.config.handshake_deadline(),
            },
        );
    }

    async fn handle_record(&mut self, conn: ConnId, record: &[u8]) {
        if let Some(pending) = self.pending.remove(&conn) {
            self.handle_handshake(conn, pending.addr, record).await;
            return;
        }

        let Some(client_id) = self.sessions.find_by_handle(conn).map(|s| s.client_id().to_string()) else {
            warn!("Record from unknown connection {}", conn);
            self.close(conn).await;
            return;
        };

        let packet = match Packet::decode(record) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Invalid record from {}: {}", client_id, e);
                return;
            }
        };

        match packet {
            Packet::Disconnect { .. } => self.disconnect(conn).await,
            Packet::Subscribe { topic } => {
                // Every request is acknowledged; an invalid pattern is not stored.
                if let Err(e) = topic::validate_pattern(&topic) {
                    warn!("Client {} subscribe rejected: {}", client_id, e);
                } else if self.sessions.subscribe(&client_id, &topic) {
                    debug!("Client {} subscribed to {}", client_id, topic);
                } else {
                    debug!("Client {} already subscribed to {}", client_id, topic);
                }
                self.send(conn, &protocol::create_suback(&topic)).await;
            }
            Packet::Unsubscribe { topic } => {
                if self.sessions.unsubscribe(&client_id, &topic) {
                    debug!("Client {} unsubscribed from {}", client_id, topic);
                } else {
                    debug!("Client {} was not subscribed to {}", client_id, topic);
                }
                self.send(conn, &protocol::create_unsuback(&topic)).await;
            }
            other => {
                warn!("Invalid operation {:?} from client {}", other.op_code(), client_id);
            }
        }
    }

    async fn handle_handshake(&mut self, conn: ConnId, addr: SocketAddr, record: &[u8]) {
        let client_id = match Packet::decode(record) {
            Ok(Packet::Connect { client_id }) if !client_id.is_empty() && client_id.len() <= MAX_ID_LEN => {
                client_id
            }
            Ok(other) => {
                warn!("Expected CONNECT from {}, got {:?}; closing", addr, other.op_code());
                self.close(conn).await;
                return;
            }
            Err(e) => {
                warn!("Invalid handshake from {}: {}; closing", addr, e);
                self.close(conn).await;
                return;
            }
        };

        match self.sessions.connect(&client_id, addr, conn) {
            ConnectOutcome::AlreadyConnected => {
                warn!("Client {} already connected.", client_id);
                self.send(conn, &protocol::create_disconnect(&client_id)).await;
                self.close(conn).await;
            }
            ConnectOutcome::Accepted { returning } => {
                if self.send(conn, &protocol::create_connack()).await {
                    info!(
                        "New client {} connected from {}:{}.",
                        client_id,
                        addr.ip(),
                        addr.port()
                    );
                    if returning {
                        debug!("Client {} resumed its subscriptions", client_id);
                    }
                }
            }
        }
    }

    async fn handle_datagram(&mut self, len: usize, from: SocketAddr) {
        let datagram = match Datagram::decode(&self.udp_buf[..len]) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Dropping datagram from {}: {}", from, e);
                return;
            }
        };

        let targets = self.sessions.matching(&datagram.topic);
        trace!(
            "Datagram from {} on {} ({}) -> {} subscribers",
            from,
            datagram.topic,
            datagram.value.data_type(),
            targets.len()
        );
        if targets.is_empty() {
            return;
        }

        let record = match protocol::create_post(from, datagram).encode() {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to encode post from {}: {}", from, e);
                return;
            }
        };

        for conn in targets {
            self.send_record(conn, &record).await;
        }
    }

    /// Send a packet; on failure the connection is dropped and false returned.
    async fn send(&mut self, conn: ConnId, packet: &Packet) -> bool {
        match packet.encode() {
            Ok(record) => self.send_record(conn, &record).await,
            Err(e) => {
                warn!("Failed to encode {:?} for {}: {}", packet.op_code(), conn, e);
                false
            }
        }
    }

    async fn send_record(&mut self, conn: ConnId, record: &[u8]) -> bool {
        let Some(writer) = self.writers.get_mut(&conn) else {
            return false;
        };
        let deadline = self.config.write_deadline();
        let result = transport::with_timeout(Some(deadline), "write", transport::write_record(writer, record)).await;
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send to {}: {}", conn, e);
                self.disconnect(conn).await;
                false
            }
        }
    }

    /// Stop monitoring a connection and close it.
    async fn close(&mut self, conn: ConnId) {
        self.readers.remove(&conn);
        self.pending.remove(&conn);
        if let Some(mut writer) = self.writers.remove(&conn) {
            if let Err(e) = writer.shutdown().await {
                trace!("Shutdown of {} failed: {}", conn, e);
            }
        }
    }

    /// Close a connection and mark its session disconnected.
    async fn disconnect(&mut self, conn: ConnId) {
        self.close(conn).await;
        if let Some(session) = self.sessions.disconnect(conn) {
            info!("Client {} disconnected.", session.client_id());
        }
    }

    async fn expire_handshakes(&mut self) {
        let now = Instant::now();
        let expired: Vec<(ConnId, SocketAddr)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(conn, p)| (*conn, p.addr))
            .collect();

        for (conn, addr) in expired {
            warn!("Connection from {} sent no CONNECT in time; closing", addr);
            self.close(conn).await;
        }
    }

    /// Notify every connected client and close all connections.
    async fn shutdown(&mut self) {
        let connected: Vec<(ConnId, String)> = self
            .sessions
            .all_connected()
            .filter_map(|s| s.conn().map(|conn| (conn, s.client_id().to_string())))
            .collect();

        info!("Shutting down, closing {} sessions", connected.len());
        for (conn, client_id) in connected {
            self.send(conn, &protocol::create_disconnect(&client_id)).await;
            self.disconnect(conn).await;
        }

        let pending: Vec<ConnId> = self.pending.keys().copied().collect();
        for conn in pending {
            self.close(conn).await;
        }
    }
}
