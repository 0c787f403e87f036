//! `/api/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "rollcall";

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the server is running.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Active sessions.
    pub connections: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, connections: usize) -> HealthResponse {
    HealthResponse {
        status: "healthy".into(),
        service: SERVICE_NAME.into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
