//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     global Shutdown (caller) → graceful request → Server::shutdown()
//!     internal Shutdown (server) → listener dropped, connections force-closed
//!     connection Shutdown (per socket) → pumps leave their loops
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger the global Shutdown
//! ```
//!
//! # Design Decisions
//! - Cancellation is a tree: each level observes its parent and its own signal
//! - Triggering is idempotent and sticky
//! - No shutdown deadline at this layer; callers wanting one wrap `start()` in a timeout

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
