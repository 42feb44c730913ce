//! WebSocket session: one connected client from upgrade through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use murmur_core::{DecodeError, SessionError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, trace, warn};

use super::connection::{ClientConnection, CloseNotice};
use super::heartbeat::{MIN_INTERVAL, spawn_monitor};
use super::lifecycle::{Disposition, LifecycleManager};
use crate::metrics::{
    CHAT_PROTOCOL_ERRORS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};

/// How long the writer gets to flush its Close frame after the read loop ends.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session timing knobs.
#[derive(Clone, Copy, Debug)]
pub struct SessionSettings {
    /// Interval between server Ping frames and liveness checks.
    pub heartbeat_interval: Duration,
    /// Close after this long without inbound activity.
    pub heartbeat_timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Accepts the transport into the lifecycle manager (`Connecting`)
/// 2. Spawns the outbound writer and the heartbeat monitor
/// 3. Routes every inbound text frame through the lifecycle manager
/// 4. Closes with the error's close code on a fatal protocol error
/// 5. Tears down exactly once, whichever side ended the session
#[instrument(skip_all, fields(conn_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    lifecycle: Arc<LifecycleManager>,
    settings: SessionSettings,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (connection, outbound_rx) = lifecycle.on_accept();
    let _ = Span::current().record("conn_id", tracing::field::display(connection.id));

    let started = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        outbound_rx,
        Arc::clone(&connection),
        settings.heartbeat_interval,
    ));
    let heartbeat = spawn_monitor(
        Arc::clone(&connection),
        settings.heartbeat_interval,
        settings.heartbeat_timeout,
    );

    loop {
        let frame = tokio::select! {
            frame = ws_rx.next() => frame,
            () = connection.cancelled() => break,
            () = shutdown.cancelled() => {
                connection.close(CloseNotice::SHUTDOWN);
                break;
            }
        };

        let msg = match frame {
            None => {
                debug!("client stream ended");
                break;
            }
            Some(Err(e)) => {
                if is_message_too_long(&e) {
                    counter!(CHAT_PROTOCOL_ERRORS_TOTAL, "code" => "message_too_big").increment(1);
                    connection.close(CloseNotice::MESSAGE_TOO_BIG);
                }
                let _ = lifecycle.on_transport_error(&connection, &e);
                break;
            }
            Some(Ok(msg)) => msg,
        };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(s) => s.to_owned(),
                Err(e) => {
                    let err = SessionError::Decode(DecodeError::MalformedJson {
                        reason: format!("binary frame is not UTF-8: {e}"),
                    });
                    reject(&connection, &err);
                    break;
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match lifecycle.on_envelope(&connection, &text) {
            Ok(Disposition::Ignored(err)) => {
                trace!(code = err.code(), "recoverable protocol error");
            }
            Ok(disposition) => trace!(?disposition, "envelope handled"),
            Err(err) => {
                reject(&connection, &err);
                break;
            }
        }
    }

    let _ = lifecycle.on_close(&connection);
    connection.close(CloseNotice::NORMAL);

    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        debug!("writer did not finish in time, aborting");
        writer.abort();
    }
    heartbeat.abort();

    info!(
        close_code = connection.close_notice().map(|n| n.code.as_u16()),
        dropped = connection.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

fn reject(connection: &ClientConnection, err: &SessionError) {
    warn!(code = err.code(), error = %err, "closing connection on protocol error");
    counter!(CHAT_PROTOCOL_ERRORS_TOTAL, "code" => err.code()).increment(1);
    connection.close(CloseNotice::from(err));
}

/// Whether a read error is the frame size limit being exceeded.
fn is_message_too_long(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.to_string().contains("Message too long") {
            return true;
        }
        current = e.source();
    }
    false
}

/// Drain the outbound queue into the socket, sending Ping frames on the
/// heartbeat interval. On cancellation, sends a Close frame carrying the
/// connection's recorded notice.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<String>>,
    connection: Arc<ClientConnection>,
    ping_every: Duration,
) {
    let mut ping = tokio::time::interval(ping_every.max(MIN_INTERVAL));
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.cancelled() => break,
            frame = outbound.recv() => {
                let Some(text) = frame else { break };
                if sink.send(Message::Text(text.as_str().to_owned().into())).await.is_err() {
                    connection.close(CloseNotice::NORMAL);
                    return;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(vec![].into())).await.is_err() {
                    connection.close(CloseNotice::NORMAL);
                    return;
                }
            }
        }
    }

    let notice = connection.close_notice().unwrap_or(CloseNotice::NORMAL);
    let frame = CloseFrame {
        code: notice.code.as_u16(),
        reason: notice.reason.to_owned().into(),
    };
    if sink.send(Message::Close(Some(frame))).await.is_ok() {
        let _ = sink.close().await;
    }
}

#[cfg(test)]
mod tests {
    // Session behaviour needs a real socket; see tests/integration.rs.

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("transport failed")]
    struct Wrapped(#[source] std::io::Error);

    #[test]
    fn message_too_long_found_in_source_chain() {
        let inner = std::io::Error::other("Space limit exceeded: Message too long: 70000 > 65536");
        assert!(is_message_too_long(&Wrapped(inner)));
        let other = std::io::Error::other("Connection reset without closing handshake");
        assert!(!is_message_too_long(&Wrapped(other)));
    }

    #[test]
    fn close_flush_timeout_shorter_than_default_shutdown() {
        assert!(CLOSE_FLUSH_TIMEOUT < crate::config::ServerConfig::default().shutdown_timeout());
    }
}
