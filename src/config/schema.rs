//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a TCP shell server.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, acceptor pool).
    pub listener: ListenerConfig,

    /// Per-connection queue sizing.
    pub queues: QueueConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8991"). Host names are resolved at bind time.
    pub bind_address: String,

    /// Number of acceptor tasks racing on the listener.
    pub accept_concurrency: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8991".to_string(),
            accept_concurrency: 10,
        }
    }
}

/// Queue sizing for every connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Packets buffered between the receive and dispatch pumps.
    pub inbound_capacity: usize,

    /// Packets buffered between `Connection::send` and the send pump.
    pub outbound_capacity: usize,

    /// Buffer size handed to readers that read raw chunks.
    pub read_buffer_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 100,
            outbound_capacity: 100,
            read_buffer_size: 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log connection and pump lifecycle events for this crate at debug level.
    pub debug: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
