//! Session Transport
//!
//! TCP transport for one hosted session: the host owns a listening socket
//! and one connection per client, a client owns a single connection to its
//! host. Reader and accept tasks do I/O only and forward everything they
//! see into an event channel; the tick-driven side drains that channel, so
//! every peer-table mutation happens on one logical thread and nothing
//! here needs a lock.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::network::protocol::{self, Message};
use crate::sim::placeholder_nickname;
use crate::MAX_PLAYERS;

/// Identifies one connection for the lifetime of the process.
pub type ConnectionId = u64;

/// The client side's single connection to its host.
const HOST_LINK_ID: ConnectionId = 0;

/// What this process is to the session. Set once when hosting or
/// connecting starts, cleared on shutdown or connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Not part of any session.
    Unset,
    /// Owns the listening socket and every decision.
    Host,
    /// Mirrors whatever the host says.
    Client,
}

/// Per-connection lifecycle. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Socket accepted, nothing read yet.
    Connecting,
    /// Waiting for the `JOIN` line.
    Handshaking,
    /// Registered; counts against capacity and receives keepalives.
    Ready,
    /// Gone: end-of-stream, I/O failure, or shutdown.
    Closed,
}

/// Transport tuning knobs.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// How long the host waits for a connection's `JOIN` line.
    pub handshake_timeout: Duration,
    /// Keepalive cadence.
    pub ping_interval: Duration,
    /// Client connections the host will register at once.
    pub max_peers: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(3),
            ping_interval: Duration::from_secs(2),
            max_peers: MAX_PLAYERS - 1,
        }
    }
}

/// Transport failures reported to the caller. Mid-session failures never
/// surface here; they drop the affected connection and come back as
/// events instead.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not bind the listening socket (usually: port already bound).
    #[error("failed to bind port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying bind failure.
        #[source]
        source: std::io::Error,
    },

    /// The host actively refused the connection.
    #[error("connection refused by {addr}")]
    Refused {
        /// Dialed address.
        addr: SocketAddr,
    },

    /// The host could not be reached at all.
    #[error("host {addr} unreachable: {source}")]
    Unreachable {
        /// Dialed address.
        addr: SocketAddr,
        /// Underlying connect failure.
        #[source]
        source: std::io::Error,
    },

    /// Already connected to a host.
    #[error("already connected to a host")]
    AlreadyConnected,

    /// Already hosting a session.
    #[error("already hosting a session")]
    AlreadyHosting,
}

/// What the tick side observes when draining the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// Host side: a connection completed its handshake and was registered.
    PeerJoined {
        /// Connection identifier, usable with `disconnect`.
        id: ConnectionId,
        /// Nickname bound at handshake.
        nickname: String,
    },

    /// Host side: a registered connection went away.
    PeerLeft {
        /// Nickname the connection was bound to.
        nickname: String,
    },

    /// An application message arrived on a registered connection.
    Inbound {
        /// Originating connection.
        id: ConnectionId,
        /// Parsed message.
        message: Message,
    },

    /// Host side: a keepalive round trip completed.
    Latency {
        /// Peer the measurement belongs to.
        nickname: String,
        /// Round-trip time, milliseconds.
        rtt_ms: u32,
    },

    /// Client side: the link to the host closed; role is back to `Unset`.
    HostClosed,

    /// Host side: the accept loop died. Existing connections remain
    /// usable but nobody else can join.
    AcceptStopped,
}

/// Raw traffic from the I/O tasks, pre-registration.
enum RawEvent {
    HandshakeDone {
        id: ConnectionId,
        addr: SocketAddr,
        nickname: String,
        tx: mpsc::UnboundedSender<String>,
    },
    Line {
        id: ConnectionId,
        line: String,
    },
    Closed {
        id: ConnectionId,
    },
    AcceptFailed,
}

struct Peer {
    nickname: String,
    addr: SocketAddr,
    state: LinkState,
    tx: mpsc::UnboundedSender<String>,
    /// When the last keepalive probe went out, if unanswered.
    ping_sent: Option<Instant>,
    /// Handshake-complete connections get keepalives; the client side's
    /// host link does not (pings flow host -> client only).
    keepalive_ready: bool,
}

/// Owns the sockets and the session role.
pub struct TransportLayer {
    config: TransportConfig,
    role: SessionRole,
    raw_tx: mpsc::UnboundedSender<RawEvent>,
    raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    shutdown_tx: broadcast::Sender<()>,
    peers: HashMap<ConnectionId, Peer>,
    accept_task: Option<JoinHandle<()>>,
    accepting: bool,
    local_addr: Option<SocketAddr>,
    last_ping: Option<Instant>,
}

impl TransportLayer {
    /// New transport with no sockets and role `Unset`.
    pub fn new(config: TransportConfig) -> Self {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            config,
            role: SessionRole::Unset,
            raw_tx,
            raw_rx,
            shutdown_tx,
            peers: HashMap::new(),
            accept_task: None,
            accepting: false,
            local_addr: None,
            last_ping: None,
        }
    }

    /// Current session role.
    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// Registered connection count.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Nickname bound to a registered connection.
    pub fn peer_nickname(&self, id: ConnectionId) -> Option<&str> {
        self.peers.get(&id).map(|peer| peer.nickname.as_str())
    }

    /// Bound listening address while hosting.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Whether the accept loop is still admitting clients.
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Bind and start accepting clients. Idempotent while already
    /// hosting; a bind failure is logged and reported but leaves the
    /// caller free to carry on.
    pub async fn start_host(&mut self, port: u16) -> Result<(), TransportError> {
        match self.role {
            SessionRole::Host => {
                info!("host already running; ignoring start request");
                return Ok(());
            }
            SessionRole::Client => return Err(TransportError::AlreadyConnected),
            SessionRole::Unset => {}
        }

        let listener = TcpListener::bind(("0.0.0.0", port)).await.map_err(|source| {
            error!(port, error = %source, "failed to start host");
            TransportError::Bind { port, source }
        })?;

        self.local_addr = listener.local_addr().ok();
        let handle = tokio::spawn(accept_loop(
            listener,
            self.raw_tx.clone(),
            self.shutdown_tx.clone(),
            self.config.handshake_timeout,
        ));
        self.accept_task = Some(handle);
        self.accepting = true;
        self.role = SessionRole::Host;
        info!(port, "host started; listening for clients");
        Ok(())
    }

    /// Open the single outbound connection to a host and send the join
    /// handshake. On failure the role stays `Unset`.
    pub async fn connect(
        &mut self,
        addr: SocketAddr,
        nickname: &str,
    ) -> Result<(), TransportError> {
        match self.role {
            SessionRole::Host => return Err(TransportError::AlreadyHosting),
            SessionRole::Client => return Err(TransportError::AlreadyConnected),
            SessionRole::Unset => {}
        }

        info!(%addr, "connecting to host");
        let stream = TcpStream::connect(addr).await.map_err(|source| {
            let err = if source.kind() == std::io::ErrorKind::ConnectionRefused {
                TransportError::Refused { addr }
            } else {
                TransportError::Unreachable { addr, source }
            };
            error!(%addr, error = %err, "connection failed");
            err
        })?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_lines(write_half, rx));

        // The join handshake is the first thing on the wire.
        let _ = tx.send(frame(&Message::Join {
            nickname: nickname.to_string(),
        }));

        let events = self.raw_tx.clone();
        let reply = tx.clone();
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let lines = BufReader::new(read_half).lines();
            pump_lines(HOST_LINK_ID, lines, events.clone(), Some(reply), shutdown).await;
            let _ = events.send(RawEvent::Closed { id: HOST_LINK_ID });
        });

        self.peers.insert(
            HOST_LINK_ID,
            Peer {
                nickname: "host".to_string(),
                addr,
                state: LinkState::Ready,
                tx,
                ping_sent: None,
                keepalive_ready: false,
            },
        );
        self.role = SessionRole::Client;
        info!(%addr, nickname, "connected; join request sent");
        Ok(())
    }

    /// Send one message: broadcast to every client when hosting, to the
    /// host when joined, dropped silently otherwise.
    pub fn send(&self, message: &Message) {
        match self.role {
            SessionRole::Host => {
                let line = frame(message);
                for peer in self.peers.values() {
                    if peer.state == LinkState::Ready {
                        let _ = peer.tx.send(line.clone());
                    }
                }
                debug!(peers = self.peers.len(), line = line.trim_end(), "broadcast");
            }
            SessionRole::Client => {
                if let Some(peer) = self.peers.get(&HOST_LINK_ID) {
                    let _ = peer.tx.send(frame(message));
                }
            }
            SessionRole::Unset => {
                debug!("send ignored; not connected");
            }
        }
    }

    /// Drop one registered connection.
    pub fn disconnect(&mut self, id: ConnectionId) {
        if let Some(mut peer) = self.peers.remove(&id) {
            peer.state = LinkState::Closed;
            info!(nickname = %peer.nickname, addr = %peer.addr, "disconnected peer");
        }
    }

    /// Drive the keepalive cadence. Host only; call once per tick.
    pub fn tick(&mut self, now: Instant) {
        if self.role != SessionRole::Host {
            return;
        }
        let due = self
            .last_ping
            .map_or(true, |at| now.duration_since(at) >= self.config.ping_interval);
        if !due {
            return;
        }
        self.last_ping = Some(now);
        for peer in self.peers.values_mut() {
            if peer.keepalive_ready && peer.state == LinkState::Ready {
                let _ = peer.tx.send(frame(&Message::Ping));
                peer.ping_sent = Some(now);
            }
        }
    }

    /// Drain everything the I/O tasks produced since the last call,
    /// updating the peer table as a side effect. Malformed lines are
    /// logged and swallowed here; the connection stays open.
    pub fn poll_events(&mut self, now: Instant) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(raw) = self.raw_rx.try_recv() {
            match raw {
                RawEvent::HandshakeDone {
                    id,
                    addr,
                    nickname,
                    tx,
                } => {
                    if self.role != SessionRole::Host {
                        debug!(%addr, %nickname, "handshake after role change; dropping");
                        continue;
                    }
                    if self.peers.len() >= self.config.max_peers {
                        warn!(%addr, %nickname, "session full; refusing connection");
                        continue;
                    }
                    info!(%addr, id, %nickname, "peer ready");
                    self.peers.insert(
                        id,
                        Peer {
                            nickname: nickname.clone(),
                            addr,
                            state: LinkState::Ready,
                            tx,
                            ping_sent: None,
                            keepalive_ready: true,
                        },
                    );
                    out.push(TransportEvent::PeerJoined { id, nickname });
                }
                RawEvent::Line { id, line } => {
                    if !self.peers.contains_key(&id) {
                        continue;
                    }
                    match Message::parse(&line) {
                        Ok(Message::Pong) if self.role == SessionRole::Host => {
                            if let Some(peer) = self.peers.get_mut(&id) {
                                match peer.ping_sent.take() {
                                    Some(sent) => {
                                        let rtt_ms =
                                            now.duration_since(sent).as_millis() as u32;
                                        debug!(
                                            nickname = %peer.nickname,
                                            rtt_ms,
                                            "keepalive round trip"
                                        );
                                        out.push(TransportEvent::Latency {
                                            nickname: peer.nickname.clone(),
                                            rtt_ms,
                                        });
                                    }
                                    None => {
                                        debug!(nickname = %peer.nickname, "unsolicited pong")
                                    }
                                }
                            }
                        }
                        Ok(message) => out.push(TransportEvent::Inbound { id, message }),
                        Err(error) => {
                            warn!(id, %error, line = %line, "ignoring malformed line");
                        }
                    }
                }
                RawEvent::Closed { id } => {
                    if let Some(mut peer) = self.peers.remove(&id) {
                        peer.state = LinkState::Closed;
                        info!(nickname = %peer.nickname, addr = %peer.addr, "connection closed");
                        if self.role == SessionRole::Client {
                            self.role = SessionRole::Unset;
                            out.push(TransportEvent::HostClosed);
                        } else {
                            out.push(TransportEvent::PeerLeft {
                                nickname: peer.nickname,
                            });
                        }
                    }
                }
                RawEvent::AcceptFailed => {
                    self.accepting = false;
                    out.push(TransportEvent::AcceptStopped);
                }
            }
        }
        out
    }

    /// Close every socket and return to `Unset`. Safe to call any number
    /// of times.
    pub fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for (_, mut peer) in self.peers.drain() {
            peer.state = LinkState::Closed;
        }
        self.role = SessionRole::Unset;
        self.accepting = false;
        self.local_addr = None;
        self.last_ping = None;
        info!("transport shut down");
    }
}

impl Drop for TransportLayer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
    }
}

/// One wire line for a message, newline-terminated.
fn frame(message: &Message) -> String {
    format!("{}\n", message.encode())
}

/// Accept clients until shutdown or a listener failure. Each accepted
/// socket gets its own handshake/reader task; a failure here only stops
/// new admissions.
async fn accept_loop(
    listener: TcpListener,
    events: mpsc::UnboundedSender<RawEvent>,
    shutdown: broadcast::Sender<()>,
    handshake_timeout: Duration,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut next_id: ConnectionId = HOST_LINK_ID + 1;
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    let id = next_id;
                    next_id += 1;
                    debug!(%addr, id, state = ?LinkState::Connecting, "incoming connection");
                    tokio::spawn(run_host_connection(
                        id,
                        stream,
                        addr,
                        handshake_timeout,
                        events.clone(),
                        shutdown.subscribe(),
                    ));
                }
                Err(error) => {
                    error!(%error, "accept loop failed; no further clients will be admitted");
                    let _ = events.send(RawEvent::AcceptFailed);
                    break;
                }
            },
            _ = shutdown_rx.recv() => {
                debug!("accept loop stopped");
                break;
            }
        }
    }
}

/// Host-side connection lifecycle: handshake, then pump lines until the
/// stream ends. A handshake timeout drops the socket before it was ever
/// registered; a malformed first line costs the sender its chosen name
/// but not the connection.
async fn run_host_connection(
    id: ConnectionId,
    stream: TcpStream,
    addr: SocketAddr,
    handshake_timeout: Duration,
    events: mpsc::UnboundedSender<RawEvent>,
    shutdown: broadcast::Receiver<()>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    debug!(%addr, id, state = ?LinkState::Handshaking, "awaiting join handshake");
    let nickname = match timeout(handshake_timeout, lines.next_line()).await {
        Err(_) => {
            warn!(%addr, id, "handshake timed out; dropping unregistered connection");
            return;
        }
        Ok(Err(error)) => {
            warn!(%addr, id, %error, "handshake read failed; dropping connection");
            return;
        }
        Ok(Ok(None)) => {
            debug!(%addr, id, "connection closed during handshake");
            return;
        }
        Ok(Ok(Some(line))) => match Message::parse(&line) {
            Ok(Message::Join { nickname }) => nickname,
            Ok(other) => {
                let fallback = placeholder_nickname();
                warn!(
                    %addr, id, message = ?other, nickname = %fallback,
                    "expected JOIN handshake; assigned placeholder nickname"
                );
                fallback
            }
            Err(error) => {
                let fallback = placeholder_nickname();
                warn!(
                    %addr, id, %error, nickname = %fallback,
                    "malformed handshake; assigned placeholder nickname"
                );
                fallback
            }
        },
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(write_half, rx));
    if events
        .send(RawEvent::HandshakeDone {
            id,
            addr,
            nickname,
            tx,
        })
        .is_err()
    {
        writer.abort();
        return;
    }

    pump_lines(id, lines, events.clone(), None, shutdown).await;
    let _ = events.send(RawEvent::Closed { id });
}

/// Forward raw lines into the event channel until end-of-stream, an I/O
/// failure, or shutdown. When `auto_pong` is set (client side), keepalive
/// probes are answered right here so round trips never wait on a tick.
async fn pump_lines(
    id: ConnectionId,
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    events: mpsc::UnboundedSender<RawEvent>,
    auto_pong: Option<mpsc::UnboundedSender<String>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(reply) = &auto_pong {
                        if line == protocol::PING {
                            let _ = reply.send(frame(&Message::Pong));
                            continue;
                        }
                    }
                    if events.send(RawEvent::Line { id, line }).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    debug!(id, %error, "read failed");
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }
}

/// Write queued lines until the channel closes or the socket dies.
async fn write_lines(mut half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        if half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}
