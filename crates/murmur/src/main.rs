//! # murmur
//!
//! Murmur chat hub binary: loads settings, starts the WebSocket server, and
//! shuts down gracefully on ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use murmur_core::logging::init_subscriber;
use murmur_server::{ChatServer, ServerConfig};
use murmur_settings::MurmurSettings;

/// Murmur chat hub.
#[derive(Parser, Debug)]
#[command(name = "murmur", about = "WebSocket chat broadcast hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `$MURMUR_SETTINGS` or `~/.murmur/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load layered settings and apply command-line overrides on top.
    fn settings(&self) -> Result<MurmurSettings> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(murmur_settings::settings_path);
        let mut settings = murmur_settings::load_settings_from_path(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok(settings)
    }

    fn apply(&self, settings: &mut MurmurSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn server_config(settings: &MurmurSettings) -> ServerConfig {
    let s = &settings.server;
    ServerConfig {
        host: s.host.clone(),
        port: s.port,
        max_connections: s.max_connections,
        max_message_size: s.max_message_size,
        outbound_queue_capacity: s.outbound_queue_capacity,
        heartbeat_interval_secs: s.heartbeat_interval_secs,
        heartbeat_timeout_secs: s.heartbeat_timeout_secs,
        typing_throttle_ms: s.typing_throttle_ms,
        shutdown_timeout_secs: s.shutdown_timeout_secs,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    init_subscriber(&settings.logging.level, settings.logging.format);

    let config = server_config(&settings);
    let shutdown_timeout = config.shutdown_timeout();
    let mut server = ChatServer::new(config);
    if settings.metrics.enabled {
        let handle = murmur_server::metrics::install_recorder()
            .context("Failed to install metrics recorder")?;
        server = server.with_metrics(handle);
    }

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Murmur listening on ws://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle], shutdown_timeout)
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
