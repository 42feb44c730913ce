//! Settings schema.
//!
//! Field names are camelCase on disk, matching what the browser client
//! tooling writes.

use murmur_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MurmurSettings {
    /// Network and connection limits.
    pub server: ServerSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Prometheus metrics.
    pub metrics: MetricsSettings,
}

/// Network, connection, and heartbeat settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` picks a free port).
    pub port: u16,
    /// Maximum simultaneously open WebSocket connections.
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue capacity (frames).
    pub outbound_queue_capacity: usize,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a Pong before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Minimum milliseconds between relayed `typing` signals per sender (`0` disables).
    pub typing_throttle_ms: u64,
    /// Seconds to wait for sessions to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 256,
            max_message_size: 64 * 1024,
            outbound_queue_capacity: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            typing_throttle_ms: 0,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Metrics settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsSettings {
    /// Install the Prometheus recorder and serve `/metrics`.
    pub enabled: bool,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl MurmurSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.host.trim().is_empty() {
            return Err(invalid("server.host must not be empty"));
        }
        if s.max_connections == 0 {
            return Err(invalid("server.maxConnections must be > 0"));
        }
        if s.max_message_size == 0 {
            return Err(invalid("server.maxMessageSize must be > 0"));
        }
        if s.outbound_queue_capacity == 0 {
            return Err(invalid("server.outboundQueueCapacity must be > 0"));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(invalid("server.heartbeatIntervalSecs must be > 0"));
        }
        if s.heartbeat_timeout_secs < s.heartbeat_interval_secs {
            return Err(invalid(
                "server.heartbeatTimeoutSecs must be >= server.heartbeatIntervalSecs",
            ));
        }
        Ok(())
    }
}

fn invalid(msg: &str) -> SettingsError {
    SettingsError::InvalidValue(msg.to_string())
}
