//! Per-connection error taxonomy.
//!
//! [`SessionError`] classifies everything that can go wrong while handling a
//! single connection. Each variant is either fatal to that connection (the
//! server sends a Close frame and tears it down) or recoverable (logged and
//! ignored). No variant ever affects another connection.

use thiserror::Error;

use crate::ids::ConnectionId;
use crate::protocol::{DecodeError, EnvelopeKind};

/// WebSocket close codes the hub sends (RFC 6455 §7.4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: server shutting down or peer unresponsive.
    GoingAway,
    /// 1007: payload data inconsistent with the message type.
    InvalidPayload,
    /// 1008: the peer violated the chat protocol.
    PolicyViolation,
    /// 1009: a frame exceeded the size limit.
    MessageTooBig,
    /// 1013: server overloaded for this peer; try again later.
    TryAgainLater,
}

impl CloseCode {
    /// Numeric code for the Close frame.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::InvalidPayload => 1007,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::TryAgainLater => 1013,
        }
    }
}

/// Errors raised while handling one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The frame could not be decoded into an envelope.
    #[error("protocol violation: {0}")]
    Decode(#[from] DecodeError),

    /// `register` carried an empty or whitespace-only name.
    #[error("username must not be empty")]
    InvalidUsername,

    /// A non-`register` envelope arrived before the handshake.
    #[error("`{kind}` received before registration")]
    NotRegistered {
        /// Kind of the offending envelope.
        kind: EnvelopeKind,
    },

    /// A second `register` on an already registered connection.
    #[error("connection is already registered as {name}")]
    AlreadyRegistered {
        /// The name bound by the first handshake.
        name: String,
    },

    /// Enqueueing an outbound frame for a recipient failed.
    #[error("delivery to {recipient} failed")]
    DeliveryFailure {
        /// The recipient that could not be reached.
        recipient: ConnectionId,
    },
}

impl SessionError {
    /// Whether the offending connection must be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AlreadyRegistered { .. })
    }

    /// Stable snake_case label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(DecodeError::MalformedJson { .. }) => "malformed_json",
            Self::Decode(DecodeError::UnknownKind(_)) => "unknown_kind",
            Self::Decode(DecodeError::InvalidPayload { .. }) => "invalid_payload",
            Self::InvalidUsername => "invalid_username",
            Self::NotRegistered { .. } => "not_registered",
            Self::AlreadyRegistered { .. } => "already_registered",
            Self::DeliveryFailure { .. } => "delivery_failure",
        }
    }

    /// Close code sent to the affected peer.
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Decode(DecodeError::InvalidPayload { .. }) | Self::InvalidUsername => {
                CloseCode::InvalidPayload
            }
            Self::Decode(_) | Self::NotRegistered { .. } | Self::AlreadyRegistered { .. } => {
                CloseCode::PolicyViolation
            }
            Self::DeliveryFailure { .. } => CloseCode::TryAgainLater,
        }
    }

    /// Short reason for the Close frame (well under the 123-byte limit).
    pub fn close_reason(&self) -> &'static str {
        match self {
            Self::Decode(DecodeError::MalformedJson { .. }) => "malformed envelope",
            Self::Decode(DecodeError::UnknownKind(_)) => "unknown envelope type",
            Self::Decode(DecodeError::InvalidPayload { .. }) => "invalid envelope fields",
            Self::InvalidUsername => "username must not be empty",
            Self::NotRegistered { .. } => "register first",
            Self::AlreadyRegistered { .. } => "already registered",
            Self::DeliveryFailure { .. } => "outbound queue overflow",
        }
    }
}
