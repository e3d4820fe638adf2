//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tcp_shell_connections_accepted_total` (counter)
//! - `tcp_shell_connections_rejected_total` (counter): refused by the connect hook
//! - `tcp_shell_connections_closed_total` (counter): by close reason
//! - `tcp_shell_active_connections` (gauge): registry size
//! - `tcp_shell_packets_received_total` / `tcp_shell_packets_sent_total` (counters)
//! - `tcp_shell_bytes_received_total` / `tcp_shell_bytes_sent_total` (counters)
//! - `tcp_shell_accept_errors_total` (counter)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::net::CloseReason;

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection_accepted() {
    counter!("tcp_shell_connections_accepted_total").increment(1);
}

pub fn record_connection_rejected() {
    counter!("tcp_shell_connections_rejected_total").increment(1);
}

pub fn record_connection_closed(reason: CloseReason) {
    counter!("tcp_shell_connections_closed_total", "reason" => reason.to_string()).increment(1);
}

pub fn set_active_connections(count: usize) {
    gauge!("tcp_shell_active_connections").set(count as f64);
}

pub fn record_packet_received(bytes: usize) {
    counter!("tcp_shell_packets_received_total").increment(1);
    counter!("tcp_shell_bytes_received_total").increment(bytes as u64);
}

pub fn record_packet_sent(bytes: usize) {
    counter!("tcp_shell_packets_sent_total").increment(1);
    counter!("tcp_shell_bytes_sent_total").increment(bytes as u64);
}

pub fn record_accept_error() {
    counter!("tcp_shell_accept_errors_total").increment(1);
}
