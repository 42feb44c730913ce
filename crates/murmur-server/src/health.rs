//! `/health` and `/users` response bodies.

use serde::Serialize;
use std::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"`, or `"shutting_down"` once shutdown has begun.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open WebSocket transports, registered or not.
    pub connections: usize,
    /// Connections that completed the registration handshake.
    pub registered: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    shutting_down: bool,
    connections: usize,
    registered: usize,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "shutting_down" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        registered,
    }
}

/// Registered display names.
#[derive(Debug, Clone, Serialize)]
pub struct UsersResponse {
    /// Number of registered connections.
    pub count: usize,
    /// Sorted names; duplicates allowed.
    pub users: Vec<String>,
}

impl From<Vec<String>> for UsersResponse {
    fn from(users: Vec<String>) -> Self {
        Self {
            count: users.len(),
            users,
        }
    }
}
