//! # Platoon
//!
//! Host-authoritative multiplayer session layer for a vehicle simulation.
//! One participant hosts a match over TCP, others join, and a small text
//! protocol keeps every participant's view of "who is in the match and
//! what they spawned" consistent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         PLATOON                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  network/          - Transport and wire protocol             │
//! │  ├── protocol.rs   - Newline-delimited text messages         │
//! │  └── transport.rs  - TCP sockets, handshake, keepalive       │
//! │                                                              │
//! │  session/          - Tick-driven session state               │
//! │  ├── roster.rs     - Who is in the session, slot-ordered     │
//! │  ├── spawn.rs      - One spawn per participant, host-led     │
//! │  └── controller.rs - Event routing, all mutation in order    │
//! │                                                              │
//! │  sim.rs            - Contracts the simulation must satisfy   │
//! │  config.rs         - Launcher configuration                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! A single logical tick drives all mutation. Socket reader and accept
//! tasks only perform I/O and push events into channels; the controller
//! drains them once per tick, in order. Orchestration waits (scene
//! readiness, factory availability, settle delays) are discrete resumable
//! steps with inspectable deadlines, never blocking sleeps. Because each
//! connection is one ordered TCP stream, every client observes the host's
//! spawn broadcasts in the order the host issued them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod network;
pub mod session;
pub mod sim;

// Re-export commonly used types
pub use network::protocol::{Message, ProtocolError};
pub use network::transport::{
    SessionRole, TransportConfig, TransportError, TransportEvent, TransportLayer,
};
pub use session::controller::SessionController;
pub use session::roster::{RosterEntry, SessionRoster};
pub use session::spawn::{SpawnConfig, SpawnCoordinator, SpawnPhase};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Session tick rate (Hz)
pub const TICK_RATE: u32 = 20;

/// Maximum participants per session, host included
pub const MAX_PLAYERS: usize = 4;

/// Default host port
pub const DEFAULT_PORT: u16 = 7777;
