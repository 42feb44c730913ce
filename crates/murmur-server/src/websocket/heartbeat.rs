//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::connection::{ClientConnection, CloseNotice};
use crate::metrics::WS_HEARTBEAT_TIMEOUTS_TOTAL;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Shortest tick the heartbeat and ping timers accept.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Run the liveness check for a connection.
///
/// Checks run every `interval`, offset by half an interval so that each one
/// falls between two server Pings and the pong for the previous Ping has had
/// time to arrive. A check returns `HeartbeatResult::TimedOut` once nothing
/// has been received from the client for `timeout` or longer.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = interval.max(MIN_INTERVAL);
    let mut checks = time::interval_at(time::Instant::now() + interval / 2, interval);

    loop {
        tokio::select! {
            _ = checks.tick() => {
                if connection.last_pong_elapsed() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

/// Spawn [`run_heartbeat`] bound to the connection's own cancellation, and
/// close the connection with 1001 if the peer goes quiet.
pub fn spawn_monitor(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = connection.token();
        let result = run_heartbeat(Arc::clone(&connection), interval, timeout, token).await;
        if result == HeartbeatResult::TimedOut {
            warn!(
                conn_id = %connection.id,
                silent_for = ?connection.last_pong_elapsed(),
                "client unresponsive, disconnecting"
            );
            counter!(WS_HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
            connection.close(CloseNotice::HEARTBEAT_TIMEOUT);
        }
    })
}
