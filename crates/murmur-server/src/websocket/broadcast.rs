//! Fan-out of chat envelopes to every registered peer except the sender.

use std::sync::Arc;

use metrics::counter;
use murmur_core::{ConnectionId, Envelope, SessionError, encode};
use tracing::{debug, warn};

use super::connection::CloseNotice;
use super::registry::ConnectionRegistry;
use crate::metrics::{CHAT_DELIVERY_FAILURES_TOTAL, CHAT_ENVELOPES_RELAYED_TOTAL};

/// Result of one fan-out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients in the snapshot.
    pub recipients: usize,
    /// Frames successfully enqueued.
    pub delivered: usize,
    /// Recipients whose queue rejected the frame. Each is scheduled for teardown.
    pub failed: Vec<ConnectionId>,
}

/// Relays envelopes through the [`ConnectionRegistry`].
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Stamp `envelope` with the sender's registered name and enqueue it for
    /// every other registered connection.
    ///
    /// Never waits on a recipient. The frame is encoded once and shared. A
    /// recipient whose queue is full or closed is removed from the registry
    /// and closed; the rest still receive the frame. Frames enqueued by one
    /// call land in each queue before frames from any later call by the same
    /// sender.
    pub fn broadcast(
        &self,
        sender: ConnectionId,
        envelope: Envelope,
    ) -> Result<BroadcastReport, SessionError> {
        let kind = envelope.kind();
        let Some(name) = self.registry.name_of(sender) else {
            return Err(SessionError::NotRegistered { kind });
        };
        let frame = match encode(&envelope.stamped(&name)) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                warn!(%sender, %kind, error = %e, "failed to encode envelope");
                return Ok(BroadcastReport::default());
            }
        };

        let peers = self.registry.all_except(sender);
        let mut report = BroadcastReport {
            recipients: peers.len(),
            ..BroadcastReport::default()
        };
        for peer in peers {
            if peer.is_closing() {
                continue;
            }
            if peer.send(Arc::clone(&frame)) {
                report.delivered += 1;
                continue;
            }
            let err = SessionError::DeliveryFailure { recipient: peer.id };
            warn!(%sender, recipient = %peer.id, dropped = peer.drop_count(), "{err}, dropping recipient");
            counter!(CHAT_DELIVERY_FAILURES_TOTAL).increment(1);
            let _ = self.registry.remove(peer.id);
            peer.close(CloseNotice::from(&err));
            report.failed.push(peer.id);
        }

        counter!(CHAT_ENVELOPES_RELAYED_TOTAL, "kind" => kind.as_str()).increment(1);
        debug!(
            %sender,
            %kind,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast envelope"
        );
        Ok(report)
    }

    /// The registry this broadcaster reads.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}
