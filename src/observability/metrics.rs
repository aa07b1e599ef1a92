//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define dispatcher metrics (requests, latency, retries, health)
//! - Expose a Prometheus-compatible endpoint when enabled
//! - Track per-backend and aggregate metrics
//!
//! # Metrics
//! - `dispatch_requests_total` (counter): by method, status, backend
//! - `dispatch_request_duration_seconds` (histogram): by method, backend
//! - `dispatch_retries_total` (counter): by reason
//! - `dispatch_no_backend_total` (counter)
//! - `dispatch_client_disconnects_total` (counter)
//! - `dispatch_backend_health` (gauge): 1=healthy, 0=unhealthy
//! - `dispatch_backend_saturated_total` (counter): by backend
//! - `dispatch_in_flight` (gauge)
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const REQUESTS_TOTAL: &str = "dispatch_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "dispatch_request_duration_seconds";
pub const RETRIES_TOTAL: &str = "dispatch_retries_total";
pub const NO_BACKEND_TOTAL: &str = "dispatch_no_backend_total";
pub const CLIENT_DISCONNECTS_TOTAL: &str = "dispatch_client_disconnects_total";
pub const BACKEND_HEALTH: &str = "dispatch_backend_health";
pub const BACKEND_SATURATED_TOTAL: &str = "dispatch_backend_saturated_total";
pub const IN_FLIGHT: &str = "dispatch_in_flight";

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!(REQUESTS_TOTAL, Unit::Count, "Requests answered by the dispatcher.");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time from request arrival to response head."
    );
    describe_counter!(RETRIES_TOTAL, Unit::Count, "Retries against another backend.");
    describe_counter!(NO_BACKEND_TOTAL, Unit::Count, "Requests rejected with no eligible backend.");
    describe_counter!(
        CLIENT_DISCONNECTS_TOTAL,
        Unit::Count,
        "Clients that went away before their response finished."
    );
    describe_gauge!(BACKEND_HEALTH, "Backend health (1 healthy, 0 unhealthy).");
    describe_counter!(
        BACKEND_SATURATED_TOTAL,
        Unit::Count,
        "Attempts refused because a backend pool and queue were full."
    );
    describe_gauge!(IN_FLIGHT, "Requests currently being dispatched.");
}

/// Record a request that received a response.
pub fn record_request(method: &str, status: u16, backend: &str, start: Instant) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string(),
        "backend" => backend.to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "backend" => backend.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_backend_health(backend: &str, healthy: bool) {
    gauge!(BACKEND_HEALTH, "backend" => backend.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_retry(reason: &'static str) {
    counter!(RETRIES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_no_backend() {
    counter!(NO_BACKEND_TOTAL).increment(1);
}

pub fn record_client_disconnect() {
    counter!(CLIENT_DISCONNECTS_TOTAL).increment(1);
}

pub fn record_saturated(backend: &str) {
    counter!(BACKEND_SATURATED_TOTAL, "backend" => backend.to_string()).increment(1);
}

pub fn set_in_flight(count: usize) {
    gauge!(IN_FLIGHT).set(count as f64);
}
