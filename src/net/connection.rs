//! Per-socket connection state, pumps and teardown.
//!
//! # Responsibilities
//! - Own the accepted socket and the extensible metadata map
//! - Run the receive, dispatch and send pumps once the connect hook accepts
//! - Tear down exactly once, whichever pump or caller notices first
//!
//! # Pumps
//! ```text
//! socket ─read─▶ receive ─inbound queue─▶ dispatch ─▶ Eventer::on_message
//! Connection::send ─outbound queue─▶ send ─write─▶ socket
//! ```
//!
//! # State Transitions
//! ```text
//! Pending → Active: connect hook accepted, pumps spawned
//! Pending → Closed: rejected or closed before activation, close hook runs inline
//! Active  → Closed: first failure or close, close hook runs after all pumps exit
//! ```
//!
//! A local close or a read failure stops the receive pump, but packets it
//! already queued are still dispatched. Only a server stop cuts dispatch short.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::QueueConfig;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::{CloseReason, ConnectionError, ConnectionId, ConnectionRegistry};
use crate::observability::metrics;
use crate::protocol::{Eventer, Packet, Reader};

/// Connection lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, waiting on the connect hook.
    Pending = 0,
    /// Pumps are running.
    Active = 1,
    /// Torn down.
    Closed = 2,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Pending,
            1 => ConnectionState::Active,
            _ => ConnectionState::Closed,
        }
    }
}

/// Everything a connection needs from the server that accepted it.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Hooks for this connection.
    pub eventer: Arc<dyn Eventer>,
    /// The server's internal shutdown; firing it closes the connection.
    pub server_shutdown: Shutdown,
    /// Registry the connection removes itself from after teardown.
    pub registry: ConnectionRegistry,
    /// Queue sizing.
    pub queues: QueueConfig,
}

/// One accepted socket.
pub struct Connection {
    id: ConnectionId,
    remote_addr: String,
    local_addr: String,
    metadata: DashMap<String, serde_json::Value>,
    state: AtomicU8,
    close_reason: Mutex<Option<CloseReason>>,
    stream: Mutex<Option<TcpStream>>,
    outbound_tx: Mutex<Option<mpsc::Sender<Packet>>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Packet>>>,
    inbound_capacity: usize,
    shutdown: Shutdown,
    server_shutdown: Shutdown,
    eventer: Arc<dyn Eventer>,
    registry: ConnectionRegistry,
}

impl Connection {
    /// Wrap an accepted socket. The connection starts `Pending` and is not
    /// registered; the acceptor does that.
    pub fn new(stream: TcpStream, ctx: ConnectionContext) -> Arc<Self> {
        let remote_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let local_addr = stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let (outbound_tx, outbound_rx) = mpsc::channel(ctx.queues.outbound_capacity.max(1));
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr,
            local_addr,
            metadata: DashMap::new(),
            state: AtomicU8::new(ConnectionState::Pending as u8),
            close_reason: Mutex::new(None),
            stream: Mutex::new(Some(stream)),
            outbound_tx: Mutex::new(Some(outbound_tx)),
            outbound_rx: Mutex::new(Some(outbound_rx)),
            inbound_capacity: ctx.queues.inbound_capacity.max(1),
            shutdown: Shutdown::new(),
            server_shutdown: ctx.server_shutdown,
            eventer: ctx.eventer,
            registry: ctx.registry,
        });

        tracing::debug!(
            connection_id = %conn.id,
            peer_addr = %conn.remote_addr,
            "New client connected"
        );
        conn
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Application-owned metadata, typically filled in by the connect hook.
    pub fn metadata(&self) -> &DashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// Lock-free check of the closed flag.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *lock(&self.close_reason)
    }

    /// Queue a packet for the send pump. Never blocks.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::Backpressure`] when the outbound queue is full (the
    /// packet is handed back and nothing queued is dropped), and
    /// [`ConnectionError::Closed`] once the connection is torn down.
    pub fn send(&self, packet: impl Into<Packet>) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let guard = lock(&self.outbound_tx);
        let Some(tx) = guard.as_ref() else {
            return Err(ConnectionError::Closed);
        };
        tx.try_send(packet.into()).map_err(|e| match e {
            TrySendError::Full(packet) => ConnectionError::Backpressure(packet),
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Tear the connection down. Idempotent and safe from any task.
    pub fn close(&self) {
        self.close_with(CloseReason::Local);
    }

    /// Tear down, recording `reason` if this call is the one that wins.
    pub(crate) fn close_with(&self, reason: CloseReason) {
        let previous =
            ConnectionState::from(self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel));
        if previous == ConnectionState::Closed {
            return;
        }

        *lock(&self.close_reason) = Some(reason);
        // The flag is already set, so concurrent senders see Closed from here on.
        lock(&self.outbound_tx).take();
        self.shutdown.trigger();

        tracing::debug!(connection_id = %self.id, reason = %reason, "Client closing");

        if previous == ConnectionState::Pending {
            lock(&self.stream).take();
            lock(&self.outbound_rx).take();
            self.finish();
        }
    }

    /// Start the pumps. Returns `false` if the connection closed first.
    pub(crate) fn activate(self: &Arc<Self>, reader: Box<dyn Reader>) -> bool {
        if self
            .state
            .compare_exchange(
                ConnectionState::Pending as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }

        let stream = lock(&self.stream).take();
        let outbound_rx = lock(&self.outbound_rx).take();
        let (Some(stream), Some(outbound_rx)) = (stream, outbound_rx) else {
            tracing::error!(connection_id = %self.id, "Socket missing at activation");
            self.close_with(CloseReason::QueueClosed);
            self.finish();
            return false;
        };

        let (read_half, write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);

        let receive = tokio::spawn(Arc::clone(self).receive_loop(reader, read_half, inbound_tx));
        let dispatch = tokio::spawn(Arc::clone(self).dispatch_loop(inbound_rx));
        let send = tokio::spawn(Arc::clone(self).send_loop(write_half, outbound_rx));

        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let (receive, dispatch, send) = tokio::join!(receive, dispatch, send);
            for (pump, result) in [("receive", receive), ("dispatch", dispatch), ("send", send)] {
                if let Err(e) = result {
                    tracing::error!(connection_id = %conn.id, pump, error = %e, "Pump terminated abnormally");
                }
            }
            conn.finish();
        });

        tracing::debug!(connection_id = %self.id, "Connection active");
        true
    }

    /// Final teardown step: close hook, then deregistration.
    fn finish(&self) {
        let hook = std::panic::catch_unwind(AssertUnwindSafe(|| self.eventer.on_close(self)));
        if hook.is_err() {
            tracing::error!(connection_id = %self.id, "Close hook panicked");
        }
        self.registry.remove(self.id);

        let reason = self.close_reason().unwrap_or(CloseReason::Local);
        metrics::record_connection_closed(reason);
        tracing::debug!(connection_id = %self.id, reason = %reason, "Client has closed");
    }

    fn stop_signal(&self) -> StopSignal {
        StopSignal {
            own: self.shutdown.subscribe(),
            server: self.server_shutdown.subscribe(),
        }
    }

    async fn receive_loop(
        self: Arc<Self>,
        mut reader: Box<dyn Reader>,
        mut read_half: OwnedReadHalf,
        inbound: mpsc::Sender<Packet>,
    ) {
        let guard = CloseOnExit::new(&self);
        let mut stop = self.stop_signal();

        loop {
            let result = tokio::select! {
                biased;
                reason = stop.recv() => { guard.set(reason); break; }
                result = reader.read(&mut read_half) => result,
            };

            let packet = match result {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Read failed");
                    guard.set(CloseReason::ReadFailed);
                    break;
                }
            };
            if packet.is_empty() {
                continue;
            }
            metrics::record_packet_received(packet.size());

            // Blocks while the dispatcher is behind, throttling the socket.
            tokio::select! {
                biased;
                reason = stop.recv() => { guard.set(reason); break; }
                pushed = inbound.send(packet) => {
                    if pushed.is_err() {
                        guard.set(CloseReason::QueueClosed);
                        break;
                    }
                }
            }
        }

        tracing::debug!(connection_id = %self.id, "Receive pump exited");
    }

    async fn dispatch_loop(self: Arc<Self>, mut inbound: mpsc::Receiver<Packet>) {
        let guard = CloseOnExit::new(&self);
        // Only a server stop cuts dispatch short. Other closes end the receive
        // pump, which drops the sender; the queue then drains to `None`.
        let mut server_stop = self.server_shutdown.subscribe();

        loop {
            let next = tokio::select! {
                biased;
                _ = server_stop.recv() => { guard.set(CloseReason::ServerShutdown); break; }
                next = inbound.recv() => next,
            };
            let Some(packet) = next else {
                guard.set(CloseReason::QueueClosed);
                break;
            };
            self.eventer.on_message(&self, packet).await;
        }

        tracing::debug!(connection_id = %self.id, "Dispatch pump exited");
    }

    async fn send_loop(
        self: Arc<Self>,
        mut write_half: OwnedWriteHalf,
        mut outbound: mpsc::Receiver<Packet>,
    ) {
        let guard = CloseOnExit::new(&self);
        let mut stop = self.stop_signal();

        loop {
            let next = tokio::select! {
                biased;
                reason = stop.recv() => { guard.set(reason); break; }
                next = outbound.recv() => next,
            };
            let Some(packet) = next else {
                guard.set(CloseReason::QueueClosed);
                break;
            };

            if !packet.is_consistent() {
                let err = ConnectionError::SizeMismatch {
                    declared: packet.size(),
                    actual: packet.payload().len(),
                };
                tracing::warn!(connection_id = %self.id, error = %err, "Dropping malformed packet");
                guard.set(CloseReason::SizeMismatch);
                break;
            }

            let written = tokio::select! {
                biased;
                reason = stop.recv() => { guard.set(reason); break; }
                written = write_half.write_all(packet.payload()) => written,
            };
            if let Err(e) = written {
                let err = ConnectionError::from(e);
                tracing::debug!(connection_id = %self.id, error = %err, "Write failed");
                guard.set(CloseReason::WriteFailed);
                break;
            }
            metrics::record_packet_sent(packet.size());

            if packet.close_after_send() {
                if let Err(e) = write_half.shutdown().await {
                    tracing::debug!(connection_id = %self.id, error = %e, "Write shutdown failed");
                }
                guard.set(CloseReason::CloseAfterSend);
                break;
            }
        }

        tracing::debug!(connection_id = %self.id, "Send pump exited");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Fires on either the connection's own shutdown or the server's.
struct StopSignal {
    own: ShutdownSignal,
    server: ShutdownSignal,
}

impl StopSignal {
    async fn recv(&mut self) -> CloseReason {
        tokio::select! {
            _ = self.own.recv() => CloseReason::Local,
            _ = self.server.recv() => CloseReason::ServerShutdown,
        }
    }
}

/// Closes the connection when a pump returns or unwinds.
struct CloseOnExit<'a> {
    conn: &'a Connection,
    reason: Mutex<CloseReason>,
}

impl<'a> CloseOnExit<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self {
            conn,
            reason: Mutex::new(CloseReason::PumpPanicked),
        }
    }

    fn set(&self, reason: CloseReason) {
        *lock(&self.reason) = reason;
    }
}

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        let reason = *lock(&self.reason);
        self.conn.close_with(reason);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Callbacks;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    fn context(callbacks: Callbacks, outbound_capacity: usize) -> ConnectionContext {
        ConnectionContext {
            eventer: Arc::new(callbacks),
            server_shutdown: Shutdown::new(),
            registry: ConnectionRegistry::new(),
            queues: QueueConfig {
                inbound_capacity: 4,
                outbound_capacity,
                read_buffer_size: 64,
            },
        }
    }

    #[tokio::test]
    async fn captures_addresses() {
        let (client, server) = socket_pair().await;
        let conn = Connection::new(server, context(Callbacks::new(), 4));

        assert_eq!(conn.remote_addr(), client.local_addr().unwrap().to_string());
        assert_eq!(conn.local_addr(), client.peer_addr().unwrap().to_string());
        assert_eq!(conn.state(), ConnectionState::Pending);
    }

    #[tokio::test]
    async fn send_fails_fast_when_outbound_queue_is_full() {
        let (_client, server) = socket_pair().await;
        let conn = Connection::new(server, context(Callbacks::new(), 3));

        for i in 0..3 {
            conn.send(format!("p{i}").as_str()).unwrap();
        }
        for _ in 0..5 {
            let err = conn.send("overflow").unwrap_err();
            assert!(matches!(err, ConnectionError::Backpressure(_)));
        }
    }

    #[tokio::test]
    async fn send_after_close_reports_closed() {
        let (_client, server) = socket_pair().await;
        let conn = Connection::new(server, context(Callbacks::new(), 1));

        conn.close();
        assert!(matches!(conn.send("late"), Err(ConnectionError::Closed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_close_runs_teardown_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let callbacks = Callbacks::new().with_on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (_client, server) = socket_pair().await;
        let ctx = context(callbacks, 4);
        let registry = ctx.registry.clone();
        let conn = Connection::new(server, ctx);
        registry.insert(&conn);
        assert!(conn.activate(Box::new(crate::protocol::ChunkReader::default())));

        let mut tasks = Vec::new();
        for _ in 0..64 {
            let conn = Arc::clone(&conn);
            tasks.push(tokio::spawn(async move { conn.close() }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        tokio::time::timeout(std::time::Duration::from_secs(5), registry.wait_until_empty())
            .await
            .expect("connection must deregister");
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.close_reason(), Some(CloseReason::Local));
    }

    #[tokio::test]
    async fn close_before_activation_runs_hook_inline() {
        let closes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closes);
        let callbacks = Callbacks::new().with_on_close(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (_client, server) = socket_pair().await;
        let conn = Connection::new(server, context(callbacks, 4));
        conn.close();
        conn.close();

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(!conn.activate(Box::new(crate::protocol::ChunkReader::default())));
    }

    #[tokio::test]
    async fn panicking_close_hook_still_deregisters() {
        let callbacks = Callbacks::new().with_on_close(|_| panic!("close hook failure"));
        let (_client, server) = socket_pair().await;
        let ctx = context(callbacks, 4);
        let registry = ctx.registry.clone();
        let conn = Connection::new(server, ctx);
        registry.insert(&conn);

        conn.close();
        assert!(registry.is_empty());
        assert_eq!(conn.close_reason(), Some(CloseReason::Local));
    }

    #[tokio::test]
    async fn server_shutdown_closes_active_connection() {
        let (_client, server) = socket_pair().await;
        let ctx = context(Callbacks::new(), 4);
        let server_shutdown = ctx.server_shutdown.clone();
        let registry = ctx.registry.clone();
        let conn = Connection::new(server, ctx);
        registry.insert(&conn);
        conn.activate(Box::new(crate::protocol::ChunkReader::default()));

        server_shutdown.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(5), registry.wait_until_empty())
            .await
            .expect("connection must close on server shutdown");
        assert!(conn.is_closed());
        assert_eq!(conn.close_reason(), Some(CloseReason::ServerShutdown));
    }

    #[test]
    fn state_from_u8() {
        assert_eq!(ConnectionState::from(0), ConnectionState::Pending);
        assert_eq!(ConnectionState::from(1), ConnectionState::Active);
        assert_eq!(ConnectionState::from(7), ConnectionState::Closed);
    }
}
