//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Fails if a recorder is
/// already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Connections registered with a hub (counter).
pub const CONNECTIONS_TOTAL: &str = "duplex_connections_total";
/// Connections removed from a hub (counter).
pub const DISCONNECTIONS_TOTAL: &str = "duplex_disconnections_total";
/// Connections currently registered (gauge).
pub const CONNECTIONS_ACTIVE: &str = "duplex_connections_active";
/// Payloads rejected by a full outbound queue (counter).
pub const QUEUE_OVERFLOWS_TOTAL: &str = "duplex_queue_overflows_total";
/// Broadcast events processed by a hub (counter).
pub const BROADCASTS_TOTAL: &str = "duplex_broadcasts_total";
