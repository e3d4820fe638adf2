//! tcp-shell: echo server on top of the TCP server shell.
//!
//! Every packet is echoed back. A packet whose text is `quit` is echoed with
//! the close flag set, so the client receives it and then sees EOF.
//!
//! ```text
//! tcp-shell --config server.toml
//! tcp-shell --bind 127.0.0.1:8991 --debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use clap::Parser;

use tcp_shell::config::validation::validate_config;
use tcp_shell::config::{load_config, ConfigError, ServerConfig};
use tcp_shell::lifecycle::{signals, Shutdown};
use tcp_shell::observability::{logging, metrics};
use tcp_shell::protocol::{BoxError, ChunkReader, Eventer, Packet, ProtocolManager, Reader};
use tcp_shell::{Connection, Server};

#[derive(Parser)]
#[command(name = "tcp-shell")]
#[command(about = "Echo server built on the TCP server shell", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Log connection and pump lifecycle events.
    #[arg(short, long)]
    debug: bool,
}

/// Echo application: both the hooks and their factory.
#[derive(Clone)]
struct EchoApp {
    chunk_size: usize,
}

#[async_trait]
impl Eventer for EchoApp {
    async fn on_connection(&self, conn: &Arc<Connection>) -> Result<(), BoxError> {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        conn.metadata()
            .insert("id".to_string(), conn.id().to_string().into());
        conn.metadata()
            .insert("connected_at".to_string(), connected_at.into());
        tracing::info!(connection_id = %conn.id(), peer_addr = %conn.remote_addr(), "Client connected");
        Ok(())
    }

    async fn on_message(&self, conn: &Arc<Connection>, packet: Packet) {
        let reply = if packet.text() == "quit" {
            Packet::closing(packet.into_payload())
        } else {
            packet
        };
        if let Err(e) = conn.send(reply) {
            tracing::warn!(connection_id = %conn.id(), error = %e, "Echo dropped");
        }
    }

    fn on_close(&self, conn: &Connection) {
        tracing::info!(
            connection_id = %conn.id(),
            reason = ?conn.close_reason(),
            "Client closed"
        );
    }
}

impl ProtocolManager for EchoApp {
    fn eventer(&self) -> Arc<dyn Eventer> {
        Arc::new(self.clone())
    }

    fn reader(&self) -> Box<dyn Reader> {
        Box::new(ChunkReader::new(self.chunk_size))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }
    if cli.debug {
        config.observability.debug = true;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability)?;
    tracing::info!("tcp-shell v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        accept_concurrency = config.listener.accept_concurrency,
        inbound_capacity = config.queues.inbound_capacity,
        outbound_capacity = config.queues.outbound_capacity,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let global = Shutdown::new();
    signals::spawn_signal_handler(global.clone());

    let app = EchoApp {
        chunk_size: config.queues.read_buffer_size,
    };
    let server = Server::new(config, app, global);
    server.start().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
