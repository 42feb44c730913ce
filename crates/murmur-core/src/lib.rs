//! # murmur-core
//!
//! Foundation types shared by the Murmur chat hub crates.
//!
//! - [`ids`]: process-unique [`ConnectionId`] allocation
//! - [`protocol`]: the wire [`Envelope`] and its JSON codec
//! - [`errors`]: the per-connection [`SessionError`] taxonomy
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::{CloseCode, SessionError};
pub use ids::ConnectionId;
pub use protocol::{DecodeError, Envelope, EnvelopeKind, decode, encode};
