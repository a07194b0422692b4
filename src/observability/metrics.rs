//! Metrics collection and exposition.
//!
//! # Metrics
//! - `extproxy_requests_total` (counter): handled requests by outcome
//! - `extproxy_request_duration_seconds` (histogram): pipeline latency by outcome
//! - `extproxy_short_circuits_total` (counter): pre-fetch short-circuits by extension
//! - `extproxy_backend_fetch_duration_seconds` (histogram): fetch latency by protocol
//! - `extproxy_backend_errors_total` (counter): failed fetches by protocol
//! - `extproxy_sub_requests_total` (counter): sub-requests submitted by extensions
//!
//! # Design Decisions
//! - Outcome label is `ok` or the error class name
//! - Prometheus listener is opt-in through `observability.metrics_address`

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| e.to_string())?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// Record one completed (or failed) pipeline run.
pub fn record_request(outcome: &'static str, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    ::metrics::counter!("extproxy_requests_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("extproxy_request_duration_seconds", "outcome" => outcome).record(elapsed);
}

pub fn record_short_circuit(extension: &str) {
    ::metrics::counter!("extproxy_short_circuits_total", "extension" => extension.to_string()).increment(1);
}

pub fn record_backend_fetch(protocol: &'static str, ok: bool, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    ::metrics::histogram!("extproxy_backend_fetch_duration_seconds", "protocol" => protocol).record(elapsed);
    if !ok {
        ::metrics::counter!("extproxy_backend_errors_total", "protocol" => protocol).increment(1);
    }
}

pub fn record_sub_request() {
    ::metrics::counter!("extproxy_sub_requests_total").increment(1);
}
