//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, dispatch latency, circuits, batches)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `gateway_http_requests_total` (counter): inbound requests by route, status
//! - `gateway_http_request_duration_seconds` (histogram): inbound latency
//! - `gateway_dispatch_total` (counter): terminal results by backend, pattern, mode, outcome
//! - `gateway_dispatch_duration_seconds` (histogram): submit-to-result latency
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by target state
//! - `gateway_circuit_open` (gauge): 1=open or half-open, 0=closed
//! - `gateway_batches_submitted_total` (counter): batch calls by trigger
//! - `gateway_batch_size` (histogram): members per batch call
//! - `gateway_queue_depth` (gauge): requests waiting in the active batch
//! - `gateway_tracker_dropped_total` (counter): result records lost to backpressure
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder (tests, CLI) every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitStatus;
use crate::tracker::ResultRecord;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Inbound HTTP request finished.
pub fn record_request(route: &'static str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_http_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_http_request_duration_seconds", "route" => route)
        .record(start.elapsed().as_secs_f64());
}

/// A request reached its terminal state.
pub fn record_dispatch(record: &ResultRecord) {
    let pattern = record.pattern.map(|p| p.as_str()).unwrap_or("none");
    metrics::counter!(
        "gateway_dispatch_total",
        "backend" => record.backend_id.clone(),
        "pattern" => pattern,
        "mode" => record.mode.as_str(),
        "outcome" => record.outcome.as_str()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_dispatch_duration_seconds",
        "backend" => record.backend_id.clone(),
        "mode" => record.mode.as_str()
    )
    .record(record.processing_time_ms as f64 / 1000.0);
}

/// Breaker moved to a new state.
pub fn record_circuit_transition(backend: &str, to: CircuitStatus) {
    metrics::counter!(
        "gateway_circuit_transitions_total",
        "backend" => backend.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    let open = if to == CircuitStatus::Closed { 0.0 } else { 1.0 };
    metrics::gauge!("gateway_circuit_open", "backend" => backend.to_string()).set(open);
}

/// A batch call was made.
pub fn record_batch_submitted(backend: &str, size: usize, trigger: &'static str) {
    metrics::counter!(
        "gateway_batches_submitted_total",
        "backend" => backend.to_string(),
        "trigger" => trigger
    )
    .increment(1);
    metrics::histogram!("gateway_batch_size", "backend" => backend.to_string()).record(size as f64);
}

/// Members currently waiting in a backend's active batch.
pub fn record_queue_depth(backend: &str, depth: usize) {
    metrics::gauge!("gateway_queue_depth", "backend" => backend.to_string()).set(depth as f64);
}

/// A result record was dropped because the tracker buffer was full.
pub fn record_tracker_dropped() {
    metrics::counter!("gateway_tracker_dropped_total").increment(1);
}
