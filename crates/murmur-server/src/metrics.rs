//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if another global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused at the connection cap or during shutdown (counter, labels: reason).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "ws_connections_rejected_total";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Completed registration handshakes (counter).
pub const CHAT_REGISTRATIONS_TOTAL: &str = "chat_registrations_total";
/// Envelopes relayed to peers (counter, labels: kind).
pub const CHAT_ENVELOPES_RELAYED_TOTAL: &str = "chat_envelopes_relayed_total";
/// Typing signals dropped by the per-sender throttle (counter).
pub const CHAT_TYPING_THROTTLED_TOTAL: &str = "chat_typing_throttled_total";
/// Per-recipient enqueue failures during fan-out (counter).
pub const CHAT_DELIVERY_FAILURES_TOTAL: &str = "chat_delivery_failures_total";
/// Connections closed for a protocol error (counter, labels: code).
pub const CHAT_PROTOCOL_ERRORS_TOTAL: &str = "chat_protocol_errors_total";
/// Connections dropped by the heartbeat monitor (counter).
pub const WS_HEARTBEAT_TIMEOUTS_TOTAL: &str = "ws_heartbeat_timeouts_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTIONS_REJECTED_TOTAL,
            WS_CONNECTION_DURATION_SECONDS,
            CHAT_REGISTRATIONS_TOTAL,
            CHAT_ENVELOPES_RELAYED_TOTAL,
            CHAT_TYPING_THROTTLED_TOTAL,
            CHAT_DELIVERY_FAILURES_TOTAL,
            CHAT_PROTOCOL_ERRORS_TOTAL,
            WS_HEARTBEAT_TIMEOUTS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
