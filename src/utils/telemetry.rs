use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

use crate::config::MetricsConfig;
use crate::utils::error::AppError;

/// Serve Prometheus metrics on `0.0.0.0:{port}` when enabled. Must be called
/// inside the Tokio runtime.
pub fn install_metrics_exporter(config: &MetricsConfig) -> Result<bool, AppError> {
    if !config.enabled {
        return Ok(false);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::Internal(format!("failed to start metrics exporter: {}", e)))?;

    metrics::describe_counter!("tenderbot_passes_total", "Completed pipeline passes");
    metrics::describe_counter!("tenderbot_fetch_attempts_total", "Fetch attempts per source, retries included");
    metrics::describe_counter!("tenderbot_records_persisted_total", "New tenders stored per source");
    metrics::describe_counter!("tenderbot_source_failures_total", "Sources that failed a pass, by stage");

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(true)
}
