//! Capability traits the connection core calls into.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::net::Connection;
use crate::protocol::Packet;

/// Error type returned by application hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The read side of an accepted socket as handed to a [`Reader`].
pub type ReadStream = dyn AsyncRead + Unpin + Send;

/// Turns raw socket bytes into packets.
///
/// One reader is created per connection, so implementations may keep
/// partial-frame state between calls.
#[async_trait]
pub trait Reader: Send {
    /// Read one packet.
    ///
    /// Any error ends the connection. An empty packet means "nothing this
    /// round" and is skipped, so a reader must report end-of-stream as an
    /// error rather than returning empty packets forever.
    async fn read(&mut self, stream: &mut ReadStream) -> std::io::Result<Packet>;
}

/// Lifecycle and message hooks for a connection.
#[async_trait]
pub trait Eventer: Send + Sync {
    /// Called once per accepted socket before any pump starts.
    ///
    /// Returning an error closes the connection without reading or writing.
    /// This is where the metadata map is usually filled in.
    async fn on_connection(&self, conn: &Arc<Connection>) -> Result<(), BoxError> {
        let _ = conn;
        Ok(())
    }

    /// Called for every inbound packet, in the order the reader produced them.
    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet);

    /// Called exactly once after the connection has been torn down.
    fn on_close(&self, conn: &Connection) {
        let _ = conn;
    }
}

/// Factory for the per-connection capability set.
pub trait ProtocolManager: Send + Sync {
    /// Hooks for a newly accepted connection.
    fn eventer(&self) -> Arc<dyn Eventer>;

    /// A fresh reader for a newly accepted connection.
    fn reader(&self) -> Box<dyn Reader>;
}
