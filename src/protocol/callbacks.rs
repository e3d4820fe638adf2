//! Closure-based capability set.
//!
//! For applications that do not want to implement [`Eventer`] and
//! [`ProtocolManager`] by hand. Unset hooks accept every connection, ignore
//! every message and do nothing on close; the default reader is a
//! [`ChunkReader`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::net::Connection;
use crate::protocol::{BoxError, ChunkReader, Eventer, Packet, ProtocolManager, Reader};

type ConnectFn = dyn Fn(&Arc<Connection>) -> Result<(), BoxError> + Send + Sync;
type MessageFn = dyn Fn(&Arc<Connection>, Packet) + Send + Sync;
type CloseFn = dyn Fn(&Connection) + Send + Sync;
type ReaderFn = dyn Fn() -> Box<dyn Reader> + Send + Sync;

/// Struct-of-callbacks form of the capability set.
#[derive(Clone, Default)]
pub struct Callbacks {
    on_connect: Option<Arc<ConnectFn>>,
    on_message: Option<Arc<MessageFn>>,
    on_close: Option<Arc<CloseFn>>,
    reader: Option<Arc<ReaderFn>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_on_connect<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(f));
        self
    }

    pub fn with_on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<Connection>, Packet) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn with_on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Connection) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Factory for per-connection readers.
    pub fn with_reader<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Box<dyn Reader> + Send + Sync + 'static,
    {
        self.reader = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("reader", &self.reader.is_some())
            .finish()
    }
}

#[async_trait]
impl Eventer for Callbacks {
    async fn on_connection(&self, conn: &Arc<Connection>) -> Result<(), BoxError> {
        match &self.on_connect {
            Some(f) => f(conn),
            None => Ok(()),
        }
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet) {
        if let Some(f) = &self.on_message {
            f(conn, packet);
        }
    }

    fn on_close(&self, conn: &Connection) {
        if let Some(f) = &self.on_close {
            f(conn);
        }
    }
}

impl ProtocolManager for Callbacks {
    fn eventer(&self) -> Arc<dyn Eventer> {
        Arc::new(self.clone())
    }

    fn reader(&self) -> Box<dyn Reader> {
        match &self.reader {
            Some(f) => f(),
            None => Box::new(ChunkReader::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_reports_which_hooks_are_set() {
        let callbacks = Callbacks::new().with_on_close(|_| {});
        let rendered = format!("{:?}", callbacks);
        assert!(rendered.contains("on_close: true"));
        assert!(rendered.contains("on_message: false"));
    }

    #[tokio::test]
    async fn default_reader_is_chunk_reader() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(16);
        client.write_all(b"ping").await.unwrap();

        let mut reader = Callbacks::new().reader();
        let packet = reader.read(&mut server).await.unwrap();
        assert_eq!(packet.payload(), b"ping");
    }
}
