//! Live stream broadcasting.
//!
//! - `Connection`: bounded outbound queue plus identifiers for one client
//! - `ConnectionRegistry`: membership and loop ownership
//! - `messages`: inbound/outbound schema
//! - `StreamBroadcaster`: the connection-driven broadcast loop and dispatch

mod broadcaster;
mod connection;
pub mod messages;
mod registry;

pub use broadcaster::{BroadcastOptions, BroadcastStats, StreamBroadcaster, StreamState};
pub use connection::{Connection, ConnectionId, PushOutcome, TransportError};
pub use messages::{decode_inbound, InboundMessage, OutboundMessage, ProtocolError};
pub use registry::ConnectionRegistry;
