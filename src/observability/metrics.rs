//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, body path
//! - `proxy_request_duration_seconds` (histogram): handler latency by body path
//! - `proxy_upstream_errors_total` (counter): failed exchanges by error kind
//! - `proxy_rewritten_bytes_total` (counter): HTML bytes emitted after rewriting
//!
//! Recording is always safe: without an installed recorder the macros are no-ops.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, path: &'static str, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "path" => path
    )
    .increment(1);
    metrics::histogram!("proxy_request_duration_seconds", "path" => path)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_error(kind: &'static str) {
    metrics::counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

pub fn record_rewritten_bytes(bytes: usize) {
    metrics::counter!("proxy_rewritten_bytes_total").increment(bytes as u64);
}
