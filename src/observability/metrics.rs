//! Metrics collection and exposition.
//!
//! # Metrics
//! - `runtime_requests_total` (counter): dispatched requests by api, operation, status
//! - `runtime_request_duration_seconds` (histogram): handler dispatch latency
//! - `runtime_in_flight_requests` (gauge): mirror of the in-flight tracker
//! - `runtime_callbacks_total` (counter): deferred callback outcomes
//! - `runtime_rejected_requests_total` (counter): admission rejections
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these freely.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished dispatch.
pub fn record_request(api: &str, operation: &str, status: &str, start: Instant) {
    metrics::counter!(
        "runtime_requests_total",
        "api" => api.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "runtime_request_duration_seconds",
        "api" => api.to_string(),
        "operation" => operation.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

/// Metric label for a gRPC status code.
pub fn code_label(code: tonic::Code) -> &'static str {
    match code {
        tonic::Code::Ok => "OK",
        tonic::Code::Cancelled => "CANCELLED",
        tonic::Code::InvalidArgument => "INVALID_ARGUMENT",
        tonic::Code::NotFound => "NOT_FOUND",
        tonic::Code::PermissionDenied => "PERMISSION_DENIED",
        tonic::Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        tonic::Code::Unimplemented => "UNIMPLEMENTED",
        tonic::Code::Internal => "INTERNAL",
        tonic::Code::Unauthenticated => "UNAUTHENTICATED",
        _ => "OTHER",
    }
}

pub fn record_in_flight(api: &str, count: u64) {
    metrics::gauge!("runtime_in_flight_requests", "api" => api.to_string()).set(count as f64);
}

pub fn record_callback(api: &str, outcome: &str) {
    metrics::counter!(
        "runtime_callbacks_total",
        "api" => api.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_rejected(api: &str) {
    metrics::counter!("runtime_rejected_requests_total", "api" => api.to_string()).increment(1);
}
