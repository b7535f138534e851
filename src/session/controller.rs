//! Session Controller
//!
//! Tick-driven glue that owns the transport, the roster, and the spawn
//! coordinator. Every transport event and every orchestration step is
//! applied here, in tick order, which is what lets the rest of the crate
//! get away without a single lock.

use std::net::SocketAddr;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::network::protocol::{sanitize_identifier, Message};
use crate::network::transport::{
    ConnectionId, SessionRole, TransportError, TransportEvent, TransportLayer,
};
use crate::session::roster::SessionRoster;
use crate::session::spawn::{SpawnConfig, SpawnCoordinator};
use crate::sim::{placeholder_nickname, CreationService, IdentityProvider, SceneProbe};
use crate::MAX_PLAYERS;

/// One session's worth of state, driven from a single periodic tick.
pub struct SessionController {
    transport: TransportLayer,
    roster: SessionRoster,
    spawner: SpawnCoordinator,
    local_nickname: String,
    pending_map: Option<String>,
}

impl SessionController {
    /// Build a controller around a transport. The local nickname comes
    /// from the identity provider, falling back to a generated
    /// placeholder when it has nothing usable.
    pub fn new(
        transport: TransportLayer,
        spawn_config: SpawnConfig,
        identity: &dyn IdentityProvider,
    ) -> Self {
        let local_nickname = identity
            .nickname()
            .and_then(|name| sanitize_identifier(&name))
            .unwrap_or_else(|| {
                let fallback = placeholder_nickname();
                warn!(nickname = %fallback, "identity provider failed; using generated nickname");
                fallback
            });
        info!(nickname = %local_nickname, "session controller ready");

        let spawner = SpawnCoordinator::new(spawn_config, &local_nickname);
        Self {
            transport,
            roster: SessionRoster::new(MAX_PLAYERS),
            spawner,
            local_nickname,
            pending_map: None,
        }
    }

    /// The nickname this process participates under.
    pub fn local_nickname(&self) -> &str {
        &self.local_nickname
    }

    /// Current session role.
    pub fn role(&self) -> SessionRole {
        self.transport.role()
    }

    /// The roster as currently known.
    pub fn roster(&self) -> &SessionRoster {
        &self.roster
    }

    /// The spawn coordinator (phase, records).
    pub fn spawner(&self) -> &SpawnCoordinator {
        &self.spawner
    }

    /// Scene name the host last announced, if any.
    pub fn pending_map(&self) -> Option<&str> {
        self.pending_map.as_deref()
    }

    /// Start hosting: bind the port and take slot 0 of the roster.
    pub async fn host(&mut self, port: u16) -> Result<(), TransportError> {
        self.transport.start_host(port).await?;
        self.roster.set_host(&self.local_nickname);
        if let Some(title) = self.roster.session_title() {
            info!(%title, "hosting");
        }
        Ok(())
    }

    /// Join a hosted session at `addr`.
    pub async fn join(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.transport.connect(addr, &self.local_nickname).await
    }

    /// Pick the local participant's loadout. The host records it
    /// directly; a client records it locally and informs the host.
    pub fn select_loadout(&mut self, loadout: &str) {
        let Some(loadout) = sanitize_identifier(loadout) else {
            warn!("empty loadout id ignored");
            return;
        };
        match self.transport.role() {
            SessionRole::Host => {
                info!(loadout = %loadout, "host loadout selected");
                self.roster.set_loadout(&self.local_nickname, &loadout);
            }
            SessionRole::Client => {
                self.roster.set_loadout(&self.local_nickname, &loadout);
                self.transport.send(&Message::TankSelect {
                    nickname: self.local_nickname.clone(),
                    loadout,
                });
            }
            SessionRole::Unset => warn!("loadout selection ignored; not in a session"),
        }
    }

    /// Announce the next scene to every client. Host only.
    pub fn announce_map(&mut self, name: &str) {
        if self.transport.role() != SessionRole::Host {
            warn!("only the host announces the next scene");
            return;
        }
        let Some(name) = sanitize_identifier(name) else {
            warn!("empty scene name ignored");
            return;
        };
        info!(map = %name, "announcing next scene");
        self.pending_map = Some(name.clone());
        self.transport.send(&Message::Map { name });
    }

    /// Kick off spawn orchestration. Host only; at most once per session.
    pub fn begin_spawn(&mut self, now: Instant) {
        if self.transport.role() != SessionRole::Host {
            warn!("only the host starts the spawn sequence");
            return;
        }
        self.spawner.start(now);
    }

    /// Re-arm a parked spawn wait.
    pub fn retry_spawn(&mut self, now: Instant) {
        self.spawner.retry(now);
    }

    /// Push the current roster to every client again.
    pub fn refresh_roster(&self) {
        self.broadcast_roster();
    }

    /// Tear the whole session down: every spawned entity is deregistered,
    /// the roster empties, sockets close, and the role returns to Unset.
    pub fn reset(&mut self, factory: &mut dyn CreationService) {
        info!("resetting session");
        self.spawner.reset(factory);
        self.roster.clear();
        self.pending_map = None;
        self.transport.shutdown();
    }

    /// One tick: keepalives, transport events, then one orchestration
    /// step. All mutation funnels through here.
    pub fn tick(&mut self, now: Instant, factory: &mut dyn CreationService, probe: &dyn SceneProbe) {
        self.transport.tick(now);
        for event in self.transport.poll_events(now) {
            self.handle_event(event, now, factory);
        }
        if let Some(notice) = self.spawner.tick(now, &self.roster, factory, probe) {
            self.transport.send(&Message::Spawn {
                nickname: notice.nickname,
                loadout: notice.loadout,
            });
        }
    }

    fn handle_event(
        &mut self,
        event: TransportEvent,
        now: Instant,
        factory: &mut dyn CreationService,
    ) {
        match event {
            TransportEvent::PeerJoined { id, nickname } => {
                if self.roster.try_add(&nickname) {
                    info!(%nickname, "participant joined");
                    self.broadcast_roster();
                } else {
                    warn!(%nickname, "roster refused participant (full or duplicate); disconnecting");
                    self.transport.disconnect(id);
                }
            }
            TransportEvent::PeerLeft { nickname } => {
                info!(%nickname, "participant left");
                self.roster.remove(&nickname);
                self.broadcast_roster();
            }
            TransportEvent::Latency { nickname, rtt_ms } => {
                self.roster.set_latency(&nickname, rtt_ms);
            }
            TransportEvent::Inbound { id, message } => {
                self.handle_message(id, message, now, factory);
            }
            TransportEvent::HostClosed => {
                warn!("lost connection to host; leaving session");
                self.roster.clear();
                self.pending_map = None;
            }
            TransportEvent::AcceptStopped => {
                warn!("accept loop stopped; no further participants can join");
            }
        }
    }

    fn handle_message(
        &mut self,
        id: ConnectionId,
        message: Message,
        now: Instant,
        factory: &mut dyn CreationService,
    ) {
        match (self.transport.role(), message) {
            (SessionRole::Host, Message::TankSelect { nickname, loadout }) => {
                // Host-authoritative: a connection only ever picks for the
                // nickname it handshook with.
                match self.transport.peer_nickname(id) {
                    Some(sender) if sender == nickname => {
                        info!(%nickname, %loadout, "loadout selected");
                        self.roster.set_loadout(&nickname, &loadout);
                    }
                    _ => warn!(id, %nickname, "loadout choice for another participant; ignoring"),
                }
            }
            (SessionRole::Client, Message::LobbyState { nicknames }) => {
                self.roster.apply_snapshot(&nicknames);
                if let Some(title) = self.roster.session_title() {
                    debug!(%title, players = self.roster.len(), "roster updated");
                }
            }
            (SessionRole::Client, Message::Map { name }) => {
                info!(map = %name, "host announced next scene");
                self.pending_map = Some(name);
            }
            (SessionRole::Client, Message::Spawn { nickname, loadout }) => {
                self.spawner
                    .apply_remote_spawn(&nickname, &loadout, now, factory);
            }
            (role, message) => {
                debug!(?role, ?message, "unexpected message; ignoring");
            }
        }
    }

    fn broadcast_roster(&self) {
        if self.transport.role() != SessionRole::Host {
            return;
        }
        let nicknames = self.roster.snapshot();
        debug!(?nicknames, "publishing roster");
        self.transport.send(&Message::LobbyState { nicknames });
    }
}
