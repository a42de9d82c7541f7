//! # dotstats
//!
//! Telemetry relay binary. Nodes report on one port, dashboards subscribe on
//! the other.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use dotstats_server::ServerConfig;
use dotstats_telemetry::{init_telemetry, TelemetryConfig};

/// Live telemetry relay.
#[derive(Parser, Debug)]
#[command(name = "dotstats", about = "Live node telemetry relay")]
struct Cli {
    /// Address nodes connect to.
    #[arg(long, default_value = "0.0.0.0:1024")]
    telemetry_addr: SocketAddr,

    /// Address dashboards connect to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    feed_addr: SocketAddr,

    /// How long a new node has to introduce itself.
    #[arg(long, default_value = "5000")]
    handshake_timeout_ms: u64,

    /// Seconds of silence after which a node is dropped.
    #[arg(long, default_value = "60")]
    node_timeout_secs: u64,

    /// Frames buffered per connection before new ones are dropped.
    #[arg(long, default_value = "256")]
    max_send_queue: usize,

    /// Default log level (RUST_LOG takes precedence).
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            telemetry_addr: self.telemetry_addr,
            feed_addr: self.feed_addr,
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            node_timeout: Duration::from_secs(self.node_timeout_secs),
            max_send_queue: self.max_send_queue,
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..TelemetryConfig::default()
    });

    let handle = dotstats_server::start(cli.server_config(), telemetry.metrics())
        .await
        .context("failed to start server")?;

    tracing::info!(
        telemetry_port = handle.telemetry_port,
        feed_port = handle.feed_port,
        "dotstats ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    handle.wait().await;
    Ok(())
}
