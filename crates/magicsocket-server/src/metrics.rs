//! Prometheus metrics recorder and metric names.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{info, warn};

static RECORDER: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the process-wide Prometheus recorder.
///
/// Only the first call installs; later calls return the same handle. Returns
/// `None` if another recorder was installed by someone else first.
pub fn install_recorder() -> Option<PrometheusHandle> {
    RECORDER
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                info!("prometheus metrics recorder installed");
                Some(handle)
            }
            Err(err) => {
                warn!(error = %err, "failed to install metrics recorder");
                None
            }
        })
        .clone()
}

/// Connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Connections torn down (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Live connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrade requests refused (counter, labels: reason).
pub const WS_REJECTIONS_TOTAL: &str = "ws_rejections_total";
/// Emit calls (counter).
pub const EMIT_TOTAL: &str = "emit_total";
/// Per-target deliveries that reached the transport (counter).
pub const EMIT_DELIVERIES_TOTAL: &str = "emit_deliveries_total";
/// Per-target deliveries that failed (counter).
pub const EMIT_FAILURES_TOTAL: &str = "emit_failures_total";
/// Hook callbacks that returned an error (counter, labels: hook).
pub const HOOK_FAILURES_TOTAL: &str = "hook_failures_total";
