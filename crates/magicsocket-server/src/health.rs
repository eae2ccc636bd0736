//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting, `"stopping"` once shutdown began.
    pub status: &'static str,
    /// Seconds since the server was created.
    pub uptime_secs: u64,
    /// Live connections in the registry.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize, stopping: bool) -> HealthResponse {
    HealthResponse {
        status: if stopping { "stopping" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
