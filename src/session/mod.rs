//! Session Logic
//!
//! Roster bookkeeping, host-authoritative spawn orchestration, and the
//! tick-driven controller that wires both to the transport.

pub mod controller;
pub mod roster;
pub mod spawn;

pub use controller::SessionController;
pub use roster::{RosterEntry, SessionRoster};
pub use spawn::{SpawnConfig, SpawnCoordinator, SpawnNotice, SpawnPhase};
