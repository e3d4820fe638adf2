//! Generic TCP server shell.
//!
//! Owns socket acceptance and per-connection lifecycle; framing, message
//! semantics and business logic come from a pluggable [`ProtocolManager`].

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod server;

pub use config::ServerConfig;
pub use lifecycle::Shutdown;
pub use net::{CloseReason, Connection, ConnectionError};
pub use protocol::{Callbacks, Eventer, Packet, ProtocolManager, Reader};
pub use server::{Server, ServerError, ServerState};
