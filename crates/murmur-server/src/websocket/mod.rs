//! WebSocket connection state, registry, lifecycle, fan-out, and heartbeat.

pub mod broadcast;
pub mod connection;
pub mod heartbeat;
pub mod lifecycle;
pub mod registry;
pub mod session;
