//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::hub::HubHandle;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while accepting connections, `"stopping"` once shutdown began
    /// or the hub loop is gone.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Connections currently registered with the hub.
    pub connections: usize,
    /// Whether the hub loop still accepts commands.
    pub hub_running: bool,
}

/// Build a health response from the hub and the shutdown state.
pub fn health_check(start_time: Instant, hub: &HubHandle, shutting_down: bool) -> HealthResponse {
    let hub_running = hub.is_running();
    HealthResponse {
        status: if hub_running && !shutting_down {
            "ok"
        } else {
            "stopping"
        },
        uptime_secs: start_time.elapsed().as_secs(),
        connections: hub.connection_count(),
        hub_running,
    }
}
