//! Per-connection state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use murmur_core::{CloseCode, ConnectionId, SessionError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Where a connection is in its lifecycle.
///
/// Transitions only move forward: `Connecting → Registered → Closed` or
/// `Connecting → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport is open, no `register` accepted yet.
    Connecting,
    /// Display name bound; eligible to send and receive broadcasts.
    Registered,
    /// Torn down. Terminal.
    Closed,
}

/// Close code and reason the writer task puts in the Close frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CloseNotice {
    /// Close code.
    pub code: CloseCode,
    /// Human-readable reason.
    pub reason: &'static str,
}

impl CloseNotice {
    /// Peer went away or the server finished normally.
    pub const NORMAL: Self = Self {
        code: CloseCode::Normal,
        reason: "",
    };
    /// Server is shutting down.
    pub const SHUTDOWN: Self = Self {
        code: CloseCode::GoingAway,
        reason: "server shutting down",
    };
    /// No pong within the heartbeat timeout.
    pub const HEARTBEAT_TIMEOUT: Self = Self {
        code: CloseCode::GoingAway,
        reason: "heartbeat timeout",
    };
    /// Inbound frame over the configured size limit.
    pub const MESSAGE_TOO_BIG: Self = Self {
        code: CloseCode::MessageTooBig,
        reason: "message too big",
    };
}

impl From<&SessionError> for CloseNotice {
    fn from(err: &SessionError) -> Self {
        Self {
            code: err.close_code(),
            reason: err.close_reason(),
        }
    }
}

/// A connected WebSocket client.
pub struct ClientConnection {
    /// Process-unique connection identity.
    pub id: ConnectionId,
    state: Mutex<ConnectionState>,
    /// Bound once by the registration handshake.
    name: OnceLock<Arc<str>>,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cancelled when the connection must be torn down.
    cancel: CancellationToken,
    /// First close reason wins.
    close_notice: Mutex<Option<CloseNotice>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Last inbound frame of any kind. Tokio's clock so paused-time tests
    /// can drive the heartbeat.
    last_pong: Mutex<tokio::time::Instant>,
    last_typing: Mutex<Option<Instant>>,
    /// Count of frames dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: Mutex::new(ConnectionState::Connecting),
            name: OnceLock::new(),
            tx,
            cancel: CancellationToken::new(),
            close_notice: Mutex::new(None),
            connected_at: now,
            last_pong: Mutex::new(tokio::time::Instant::now()),
            last_typing: Mutex::new(None),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Registered display name, if the handshake has completed.
    pub fn display_name(&self) -> Option<Arc<str>> {
        self.name.get().cloned()
    }

    /// `Connecting → Registered`. Returns `false` from any other state.
    pub(crate) fn mark_registered(&self, name: Arc<str>) -> bool {
        let mut state = self.state.lock();
        if *state != ConnectionState::Connecting || self.name.set(name).is_err() {
            return false;
        }
        *state = ConnectionState::Registered;
        true
    }

    /// Move to `Closed`. Returns `true` only for the call that made the transition.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ConnectionState::Closed {
            return false;
        }
        *state = ConnectionState::Closed;
        true
    }

    /// Enqueue a frame for the write task without waiting.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Request teardown. The first notice recorded is the one sent to the peer.
    pub fn close(&self, notice: CloseNotice) {
        {
            let mut slot = self.close_notice.lock();
            if slot.is_none() {
                *slot = Some(notice);
            }
        }
        self.cancel.cancel();
    }

    /// Whether teardown has been requested.
    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The notice recorded by the first [`close`](Self::close) call.
    pub fn close_notice(&self) -> Option<CloseNotice> {
        *self.close_notice.lock()
    }

    /// Resolves once teardown has been requested.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// A token cancelled together with this connection.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Mark the connection as alive (pong or any inbound frame).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = tokio::time::Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Whether a typing signal at `now` clears the per-sender throttle.
    ///
    /// Records `now` when it does.
    pub fn allow_typing(&self, throttle: Duration, now: Instant) -> bool {
        let mut last = self.last_typing.lock();
        match *last {
            Some(prev) if now.saturating_duration_since(prev) < throttle => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("name", &self.name.get())
            .finish_non_exhaustive()
    }
}
