//! Networking
//!
//! Wire protocol and TCP transport for one hosted session.
//! Non-deterministic by nature; everything it observes is funneled into
//! events the tick-driven session logic drains in order.

pub mod protocol;
pub mod transport;

pub use protocol::{Message, ProtocolError};
pub use transport::{
    ConnectionId, SessionRole, TransportConfig, TransportError, TransportEvent, TransportLayer,
};
