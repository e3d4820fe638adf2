//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, shared accept)
//!     → connection.rs (Pending: connect hook decides)
//!     → connection.rs (Active: receive / dispatch / send pumps)
//!     → registry.rs (tracked until the close hook has run)
//!
//! Connection States:
//!     Pending → Active → Closed
//!     Pending → Closed (rejected)
//! ```
//!
//! # Design Decisions
//! - Bounded queues on both sides; send never blocks, receive does
//! - One atomic state doubles as the closed flag and the close-once gate
//! - Each connection tracked for broadcast close on server stop

pub mod connection;
pub mod error;
pub mod listener;
pub mod registry;

pub use connection::{Connection, ConnectionContext, ConnectionState};
pub use error::{CloseReason, ConnectionError};
pub use listener::{Listener, ListenerError};
pub use registry::{ConnectionId, ConnectionRegistry};
