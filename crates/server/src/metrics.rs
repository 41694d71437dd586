//! Process-wide Prometheus metrics.
//!
//! Coarser-grained than the per-turn `MetricsTracker` the pipeline emits in
//! the `metrics` WebSocket frame: this is the `/metrics` scrape target.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global Prometheus recorder and returns a handle whose
/// `render()` produces the exposition-format text served at `/metrics`.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_ws_connection() {
    metrics::counter!("ws_connections_total").increment(1);
}

pub fn record_request(path: &'static str, status: u16) {
    metrics::counter!("http_requests_total", "path" => path, "status" => status.to_string())
        .increment(1);
}
