//! # murmur-server
//!
//! Axum HTTP + `WebSocket` chat hub.
//!
//! - `WebSocket` gateway on `/` and `/ws`: registration handshake, heartbeat,
//!   fan-out of `message` and `typing` envelopes to every other registered peer
//! - HTTP endpoints: `/health`, `/users`, `/metrics`
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{AppState, ChatServer, ServerError};
pub use shutdown::ShutdownCoordinator;
