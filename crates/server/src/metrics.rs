//! Prometheus exposition of the service counters.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder once and describe the counters.
///
/// Safe to call multiple times; later calls return the existing handle. When
/// another recorder is already installed the error is logged and `None` is
/// returned, leaving `/metrics` unavailable.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            service::metrics::register_metrics();
            metrics::describe_counter!(
                "filter_http_requests_total",
                "HTTP requests served, by method and status"
            );
            tracing::info!("Prometheus metrics recorder initialized");
            Some(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            None
        }
    }
}

/// Returns the global Prometheus handle, if initialized.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Handler for the `/metrics` endpoint.
pub async fn serve_metrics() -> impl IntoResponse {
    prometheus_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain; charset=utf-8")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            (
                StatusCode::OK,
                [("content-type", "text/plain; charset=utf-8")],
                handle.render(),
            )
        },
    )
}
