//! TCP server shell.
//!
//! # Responsibilities
//! - Bind the listener and run a fixed pool of acceptor tasks
//! - Hand each accepted socket to the connect hook, then start its pumps
//! - Observe the caller's global shutdown (graceful request) and its own
//!   internal shutdown (actual stop)
//! - On stop: close the listener once, force-close every live connection,
//!   wait for their close hooks
//!
//! # Design Decisions
//! - Acceptors race on one listener; the OS spreads connections across them
//! - An accept error ends only that acceptor; losing the last one escalates
//!   to a full shutdown instead of silently refusing new clients
//! - No shutdown deadline; wrap `start()` in a timeout if one is needed

pub mod error;
pub mod state;

pub use error::ServerError;
pub use state::ServerState;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::lifecycle::Shutdown;
use crate::net::{
    CloseReason, Connection, ConnectionContext, ConnectionId, ConnectionRegistry, Listener,
};
use crate::observability::metrics;
use crate::protocol::ProtocolManager;

/// A TCP server that delegates framing and message handling to a [`ProtocolManager`].
pub struct Server {
    config: ServerConfig,
    protocol: Arc<dyn ProtocolManager>,
    global_shutdown: Shutdown,
    internal_shutdown: Shutdown,
    registry: ConnectionRegistry,
    state_tx: watch::Sender<ServerState>,
    local_addr: OnceLock<SocketAddr>,
    started: AtomicBool,
    live_acceptors: AtomicUsize,
    acceptors_exhausted: AtomicBool,
}

impl Server {
    /// Create a server. `global_shutdown` is the caller's graceful-stop signal.
    pub fn new(
        config: ServerConfig,
        protocol: impl ProtocolManager + 'static,
        global_shutdown: Shutdown,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ServerState::Created);
        Arc::new(Self {
            config,
            protocol: Arc::new(protocol),
            global_shutdown,
            internal_shutdown: Shutdown::new(),
            registry: ConnectionRegistry::new(),
            state_tx,
            local_addr: OnceLock::new(),
            started: AtomicBool::new(false),
            live_acceptors: AtomicUsize::new(0),
            acceptors_exhausted: AtomicBool::new(false),
        })
    }

    /// Bind, accept and block until the server has fully stopped.
    ///
    /// # Errors
    ///
    /// Bind failures are returned before anything is spawned.
    /// [`ServerError::AcceptorsExhausted`] is returned after teardown when the
    /// server stopped itself because every acceptor failed.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyStarted);
        }
        if self.internal_shutdown.is_triggered() {
            self.transition(ServerState::Stopped);
            return Ok(());
        }

        let listener = match Listener::bind(&self.config.listener).await {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                tracing::error!(error = %e, "Failed to start TCP server");
                return Err(e.into());
            }
        };
        let addr = listener.local_addr();
        let _ = self.local_addr.set(addr);

        let concurrency = self.config.listener.accept_concurrency.max(1);
        self.live_acceptors.store(concurrency, Ordering::SeqCst);
        let mut acceptors = JoinSet::new();
        for index in 0..concurrency {
            acceptors.spawn(Arc::clone(self).accept_loop(index, Arc::clone(&listener)));
        }
        drop(listener);

        self.transition(ServerState::Running);
        tracing::info!(address = %addr, acceptors = concurrency, "TCP server running");

        let mut global = self.global_shutdown.subscribe();
        let mut internal = self.internal_shutdown.subscribe();
        tokio::select! {
            _ = internal.recv() => {}
            _ = global.recv() => {
                tracing::info!("Global shutdown requested");
                self.shutdown();
            }
        }

        // Acceptors hold the only listener handles; joining them closes it.
        while let Some(result) = acceptors.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Acceptor terminated abnormally");
            }
        }
        tracing::info!(address = %addr, "Listener closed");

        let signalled = self.registry.close_all(CloseReason::ServerShutdown);
        if signalled > 0 {
            tracing::info!(connections = signalled, "Closing live connections");
        }
        self.registry.wait_until_empty().await;

        self.transition(ServerState::Stopped);
        tracing::info!("TCP server has shut down");

        if self.acceptors_exhausted.load(Ordering::SeqCst) {
            Err(ServerError::AcceptorsExhausted)
        } else {
            Ok(())
        }
    }

    /// Request a graceful stop. Idempotent and non-blocking.
    pub fn shutdown(&self) {
        self.transition(ServerState::Draining);
        if self.internal_shutdown.trigger() {
            tracing::info!("TCP server shutting down");
        }
    }

    pub fn state(&self) -> ServerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state_tx.subscribe()
    }

    /// The bound address, once `start` has bound the listener.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Number of connections that have not finished teardown.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    /// Look up a live connection by ID.
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.registry.get(id)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn transition(&self, next: ServerState) -> bool {
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                tracing::debug!(from = %state, to = %next, "Server state changed");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    async fn accept_loop(self: Arc<Self>, index: usize, listener: Arc<Listener>) {
        let mut stop = self.internal_shutdown.subscribe();
        // Counts as a failure unless the loop ends on the stop signal, so a
        // panicking connect hook also retires the acceptor.
        let mut exit = AcceptorExit {
            server: &self,
            index,
            failed: true,
        };

        loop {
            let accepted = tokio::select! {
                biased;
                _ = stop.recv() => {
                    exit.failed = false;
                    break;
                }
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _peer)) => self.handle_accepted(stream).await,
                Err(e) => {
                    tracing::warn!(acceptor = index, error = %e, "Acceptor stopped");
                    metrics::record_accept_error();
                    break;
                }
            }
        }
    }

    async fn handle_accepted(&self, stream: TcpStream) {
        metrics::record_connection_accepted();

        let eventer = self.protocol.eventer();
        let conn = Connection::new(
            stream,
            ConnectionContext {
                eventer: Arc::clone(&eventer),
                server_shutdown: self.internal_shutdown.clone(),
                registry: self.registry.clone(),
                queues: self.config.queues.clone(),
            },
        );
        self.registry.insert(&conn);

        match eventer.on_connection(&conn).await {
            Ok(()) => {
                conn.activate(self.protocol.reader());
            }
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "Connection rejected");
                metrics::record_connection_rejected();
                conn.close_with(CloseReason::Rejected);
            }
        }
    }
}

/// Retires an acceptor when its loop returns or unwinds.
struct AcceptorExit<'a> {
    server: &'a Server,
    index: usize,
    failed: bool,
}

impl Drop for AcceptorExit<'_> {
    fn drop(&mut self) {
        let server = self.server;
        let remaining = server.live_acceptors.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(acceptor = self.index, remaining, "Acceptor exited");

        if self.failed && remaining == 0 && !server.internal_shutdown.is_triggered() {
            tracing::error!("All acceptors failed; shutting down");
            server.acceptors_exhausted.store(true, Ordering::SeqCst);
            server.shutdown();
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("active_connections", &self.active_connections())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Callbacks;
    use std::time::Duration;

    fn config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();
        config.listener.accept_concurrency = 2;
        config
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let server = Server::new(config(), Callbacks::new(), Shutdown::new());
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        let mut state = server.subscribe_state();
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();

        assert!(matches!(server.start().await, Err(ServerError::AlreadyStarted)));

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_before_start_stops_without_binding() {
        let server = Server::new(config(), Callbacks::new(), Shutdown::new());
        server.shutdown();

        server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn bind_failure_returns_synchronously() {
        let mut config = config();
        config.listener.bind_address = "127.0.0.1:99999".to_string();
        let server = Server::new(config, Callbacks::new(), Shutdown::new());

        let err = server.start().await.unwrap_err();
        assert!(matches!(err, ServerError::Bind(_)));
        assert_eq!(server.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn losing_every_acceptor_escalates_to_shutdown() {
        let callbacks = Callbacks::new().with_on_connect(|_| panic!("connect hook failure"));
        let server = Server::new(config(), callbacks, Shutdown::new());
        let mut state = server.subscribe_state();
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();
        let addr = server.local_addr().unwrap();

        // Two acceptors; each connection takes one down.
        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server must stop once every acceptor is gone")
            .unwrap();
        assert!(matches!(result, Err(ServerError::AcceptorsExhausted)));
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.active_connections(), 0);
    }

    #[tokio::test]
    async fn global_shutdown_moves_through_draining_to_stopped() {
        let global = Shutdown::new();
        let server = Server::new(config(), Callbacks::new(), global.clone());
        let mut state = server.subscribe_state();
        let running = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.start().await })
        };
        state.wait_for(|s| *s == ServerState::Running).await.unwrap();

        global.trigger();
        state.wait_for(|s| *s == ServerState::Stopped).await.unwrap();
        running.await.unwrap().unwrap();
    }
}
