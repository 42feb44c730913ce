//! Connection lifecycle: accept, registration handshake, envelope routing,
//! and teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use murmur_core::{ConnectionId, Envelope, SessionError, decode};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::broadcast::{BroadcastReport, Broadcaster};
use super::connection::{ClientConnection, ConnectionState};
use super::registry::ConnectionRegistry;
use crate::metrics::{CHAT_REGISTRATIONS_TOTAL, CHAT_TYPING_THROTTLED_TOTAL};

/// What happened to an inbound envelope that did not close the connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Handshake completed under this name.
    Registered(Arc<str>),
    /// Relayed to peers.
    Relayed(BroadcastReport),
    /// Typing signal dropped by the per-sender throttle.
    Throttled,
    /// Recoverable protocol error; logged and dropped.
    Ignored(SessionError),
    /// Arrived after teardown began; dropped silently.
    Discarded,
}

/// Owns the registry and broadcaster and drives every connection through
/// `Connecting → Registered → Closed`.
pub struct LifecycleManager {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    queue_capacity: usize,
    typing_throttle: Option<Duration>,
    open: AtomicUsize,
}

impl LifecycleManager {
    /// Create a manager with the given per-connection queue capacity and
    /// optional typing throttle.
    pub fn new(queue_capacity: usize, typing_throttle: Option<Duration>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            queue_capacity: queue_capacity.max(1),
            typing_throttle,
            open: AtomicUsize::new(0),
        }
    }

    /// A freshly upgraded transport: allocate an identity and an outbound
    /// queue. The connection starts `Connecting` and is not yet in the
    /// registry.
    pub fn on_accept(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let connection = Arc::new(ClientConnection::new(ConnectionId::next(), tx));
        let open = self.open.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(conn_id = %connection.id, open, "connection accepted");
        (connection, rx)
    }

    /// Decode and route one inbound text frame.
    ///
    /// Frames from a connection already being torn down are discarded.
    /// `Err` means the connection must be closed with the error's close code.
    pub fn on_envelope(
        &self,
        connection: &Arc<ClientConnection>,
        raw: &str,
    ) -> Result<Disposition, SessionError> {
        if connection.is_closing() {
            return Ok(Disposition::Discarded);
        }
        let envelope = decode(raw)?;
        match connection.state() {
            ConnectionState::Closed => Ok(Disposition::Discarded),
            ConnectionState::Connecting => match envelope {
                Envelope::Register { username } => self.register(connection, &username),
                other => Err(SessionError::NotRegistered { kind: other.kind() }),
            },
            ConnectionState::Registered => self.route(connection, envelope),
        }
    }

    fn register(
        &self,
        connection: &Arc<ClientConnection>,
        username: &str,
    ) -> Result<Disposition, SessionError> {
        let name = username.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidUsername);
        }
        let name: Arc<str> = Arc::from(name);
        if !self.registry.insert(connection, Arc::clone(&name)) {
            return Ok(Disposition::Discarded);
        }
        counter!(CHAT_REGISTRATIONS_TOTAL).increment(1);
        info!(conn_id = %connection.id, username = %name, registered = self.registry.len(), "user registered");
        Ok(Disposition::Registered(name))
    }

    fn route(
        &self,
        connection: &Arc<ClientConnection>,
        envelope: Envelope,
    ) -> Result<Disposition, SessionError> {
        match envelope {
            Envelope::Register { .. } => {
                let err = SessionError::AlreadyRegistered {
                    name: connection
                        .display_name()
                        .map(|n| n.to_string())
                        .unwrap_or_default(),
                };
                warn!(conn_id = %connection.id, code = err.code(), "{err}, ignoring");
                Ok(Disposition::Ignored(err))
            }
            Envelope::Typing { .. } if !self.typing_allowed(connection) => {
                counter!(CHAT_TYPING_THROTTLED_TOTAL).increment(1);
                Ok(Disposition::Throttled)
            }
            envelope => Ok(Disposition::Relayed(
                self.broadcaster.broadcast(connection.id, envelope)?,
            )),
        }
    }

    fn typing_allowed(&self, connection: &ClientConnection) -> bool {
        match self.typing_throttle {
            Some(throttle) => connection.allow_typing(throttle, Instant::now()),
            None => true,
        }
    }

    /// Tear the connection down: drop its registry entry and move it to
    /// `Closed`. Safe to call any number of times; returns `true` only for the
    /// call that performed the teardown.
    pub fn on_close(&self, connection: &ClientConnection) -> bool {
        let retired = self.registry.retire(connection);
        if !retired.newly_closed {
            return false;
        }
        let open = self.open.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        match retired.name {
            Some(name) => info!(
                conn_id = %connection.id,
                username = %name,
                registered = self.registry.len(),
                "user left"
            ),
            None => debug!(conn_id = %connection.id, open, "unregistered connection closed"),
        }
        true
    }

    /// The transport failed. Logs and tears the connection down.
    pub fn on_transport_error(
        &self,
        connection: &ClientConnection,
        error: &(dyn std::error::Error + 'static),
    ) -> bool {
        warn!(conn_id = %connection.id, error = %error, "websocket transport error");
        self.on_close(connection)
    }

    /// The connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Transports accepted and not yet closed, registered or not.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }
}
