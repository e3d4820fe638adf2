//! Live connection registry.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track every connection from accept until its close hook has run
//! - Broadcast a forced close on server stop
//! - Let the server wait until every connection has finished teardown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::net::{CloseReason, Connection};
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks live connections for shutdown broadcast.
///
/// Uses a watch channel carrying the live count so waiters wake on change.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    connections: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    count_tx: Arc<watch::Sender<usize>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            connections: Arc::new(DashMap::new()),
            count_tx: Arc::new(tx),
        }
    }

    /// Start tracking a connection.
    pub fn insert(&self, conn: &Arc<Connection>) {
        if self.connections.insert(conn.id(), Arc::clone(conn)).is_none() {
            self.count_tx.send_modify(|n| *n += 1);
            metrics::set_active_connections(*self.count_tx.borrow());
        }
    }

    /// Stop tracking a connection. Returns whether it was tracked.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id).is_some();
        if removed {
            self.count_tx.send_modify(|n| *n = n.saturating_sub(1));
            metrics::set_active_connections(*self.count_tx.borrow());
        }
        removed
    }

    /// Look up a live connection.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Current count of tracked connections.
    pub fn len(&self) -> usize {
        *self.count_tx.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force-close every tracked connection. Returns how many were signalled.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        // Snapshot first: closing deregisters, which needs the shard locks.
        let snapshot: Vec<Arc<Connection>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for conn in &snapshot {
            conn.close_with(reason);
        }
        snapshot.len()
    }

    /// Wait until every tracked connection has finished teardown.
    pub async fn wait_until_empty(&self) {
        let mut rx = self.count_tx.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn connection_id_display() {
        let id = ConnectionId(42);
        assert_eq!(id.to_string(), "conn-42");
    }

    #[tokio::test]
    async fn empty_registry_does_not_wait() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.close_all(CloseReason::ServerShutdown), 0);
        tokio::time::timeout(std::time::Duration::from_secs(1), registry.wait_until_empty())
            .await
            .expect("empty registry resolves immediately");
    }
}
