//! Wire envelope and JSON codec.
//!
//! One envelope travels per WebSocket text frame. The `type` field selects
//! the variant:
//!
//! | Kind | Client → Server | Server → Client |
//! |------|-----------------|-----------------|
//! | `register` | `{"type":"register","username":"…"}` | never sent |
//! | `message` | `{"type":"message","text":"…"}` | `{"type":"message","from":"…","text":"…"}` |
//! | `typing` | `{"type":"typing","from":"…"}` | `{"type":"typing","from":"…"}` |
//!
//! A client-supplied `from` is decoded but never trusted: the server
//! replaces it with the sender's registered name via [`Envelope::stamped`].

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Discriminant of an [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// Registration handshake.
    Register,
    /// Chat message.
    Message,
    /// Ephemeral typing signal.
    Typing,
}

impl EnvelopeKind {
    /// Wire tag for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Message => "message",
            Self::Typing => "typing",
        }
    }

    /// Parse a wire tag. Tags are case-sensitive.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "register" => Some(Self::Register),
            "message" => Some(Self::Message),
            "typing" => Some(Self::Typing),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single wire message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Bind a display name to the connection.
    Register {
        /// Requested display name (validated by the lifecycle manager).
        username: String,
    },
    /// A chat line.
    Message {
        /// Sender display name; server-stamped on the way out.
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        /// Message body.
        text: String,
    },
    /// "User is typing" signal.
    Typing {
        /// Sender display name; server-stamped on the way out.
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
}

impl Envelope {
    /// The kind of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Register { .. } => EnvelopeKind::Register,
            Self::Message { .. } => EnvelopeKind::Message,
            Self::Typing { .. } => EnvelopeKind::Typing,
        }
    }

    /// Replace the `from` field with the authoritative sender name.
    ///
    /// `register` envelopes carry no sender and are returned unchanged.
    #[must_use]
    pub fn stamped(self, sender: &str) -> Self {
        match self {
            Self::Message { text, .. } => Self::Message {
                from: Some(sender.to_owned()),
                text,
            },
            Self::Typing { .. } => Self::Typing {
                from: Some(sender.to_owned()),
            },
            register @ Self::Register { .. } => register,
        }
    }
}

/// Why an inbound payload could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not a well-formed JSON object.
    #[error("malformed JSON: {reason}")]
    MalformedJson {
        /// Parser diagnostic.
        reason: String,
    },
    /// `type` absent, not a string, or not a known kind.
    #[error("unknown envelope kind: {}", .0.as_deref().unwrap_or("<missing>"))]
    UnknownKind(Option<String>),
    /// Known kind, but a required field is missing or mistyped.
    #[error("invalid {kind} envelope: {reason}")]
    InvalidPayload {
        /// Kind whose payload failed validation.
        kind: EnvelopeKind,
        /// Which field was wrong.
        reason: String,
    },
}

/// Decode one inbound frame.
pub fn decode(raw: &str) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_str(raw).map_err(|e| DecodeError::MalformedJson {
        reason: e.to_string(),
    })?;
    let Value::Object(fields) = value else {
        return Err(DecodeError::MalformedJson {
            reason: "expected a JSON object".into(),
        });
    };

    let kind = match fields.get("type") {
        Some(Value::String(tag)) => {
            EnvelopeKind::from_tag(tag).ok_or_else(|| DecodeError::UnknownKind(Some(tag.clone())))?
        }
        _ => return Err(DecodeError::UnknownKind(None)),
    };

    match kind {
        EnvelopeKind::Register => Ok(Envelope::Register {
            username: required_str(&fields, kind, "username")?,
        }),
        EnvelopeKind::Message => Ok(Envelope::Message {
            from: optional_str(&fields, "from"),
            text: required_str(&fields, kind, "text")?,
        }),
        EnvelopeKind::Typing => Ok(Envelope::Typing {
            from: optional_str(&fields, "from"),
        }),
    }
}

/// Encode one outbound frame.
pub fn encode(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(envelope)
}

fn required_str(
    fields: &Map<String, Value>,
    kind: EnvelopeKind,
    name: &str,
) -> Result<String, DecodeError> {
    match fields.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(DecodeError::InvalidPayload {
            kind,
            reason: format!("`{name}` must be a string"),
        }),
        None => Err(DecodeError::InvalidPayload {
            kind,
            reason: format!("missing `{name}`"),
        }),
    }
}

// Client-sent `from` is advisory; a mistyped one is dropped rather than rejected.
fn optional_str(fields: &Map<String, Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(Value::as_str).map(str::to_owned)
}
