//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use tcp_shell::config::ServerConfig;
use tcp_shell::lifecycle::Shutdown;
use tcp_shell::protocol::{Callbacks, Packet, ProtocolManager};
use tcp_shell::server::{Server, ServerError, ServerState};

pub const WAIT: Duration = Duration::from_secs(5);

/// Ephemeral-port config with the given pool and outbound queue sizes.
pub fn test_config(accept_concurrency: usize, outbound_capacity: usize) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.listener.accept_concurrency = accept_concurrency;
    config.queues.outbound_capacity = outbound_capacity;
    config
}

/// Echo every packet; `quit` is echoed with the close flag.
pub fn echo_protocol() -> Callbacks {
    Callbacks::new().with_on_message(|conn, packet| {
        let reply = if packet.text() == "quit" {
            Packet::closing(packet.into_payload())
        } else {
            packet
        };
        let _ = conn.send(reply);
    })
}

/// A server running on a background task.
pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    pub global: Shutdown,
    handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Start the server and wait until it reports `Running`.
    pub async fn start(config: ServerConfig, protocol: impl ProtocolManager + 'static) -> Self {
        let global = Shutdown::new();
        let server = Server::new(config, protocol, global.clone());
        let mut state = server.subscribe_state();

        let handle = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };

        tokio::time::timeout(WAIT, state.wait_for(|s| *s == ServerState::Running))
            .await
            .expect("server did not start in time")
            .expect("state channel closed");
        let addr = server.local_addr().expect("server should be bound");

        Self {
            server,
            addr,
            global,
            handle,
        }
    }

    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.addr).await.expect("connect failed")
    }

    /// Wait for `start()` to return.
    pub async fn join(self) -> Result<(), ServerError> {
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("server did not stop in time")
            .expect("server task panicked")
    }
}

/// Read until the peer closes. A reset counts as closed.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = tokio::time::timeout(WAIT, stream.read_to_end(&mut buf))
        .await
        .expect("peer did not close in time");
    buf
}
