//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Call once at startup, before
/// any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

// Metric name constants.

/// WebSocket connections accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Live WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Server-initiated closes (counter, labels: code).
pub const WS_CLOSES_TOTAL: &str = "ws_closes_total";
/// Operations registered (counter).
pub const OPERATIONS_STARTED_TOTAL: &str = "operations_started_total";
/// Operations ending with `complete` (counter).
pub const OPERATIONS_COMPLETED_TOTAL: &str = "operations_completed_total";
/// Operations ending with `error` (counter).
pub const OPERATIONS_FAILED_TOTAL: &str = "operations_failed_total";
/// Operations cancelled by the client or by teardown (counter).
pub const OPERATIONS_CANCELLED_TOTAL: &str = "operations_cancelled_total";
/// Live operations (gauge).
pub const OPERATIONS_ACTIVE: &str = "operations_active";
/// Connections closed because their outbound queue filled up (counter).
pub const OUTBOUND_OVERFLOWS_TOTAL: &str = "outbound_overflows_total";
