//! Prometheus metrics exposition
//!
//! Installs the global recorder and defines the HTTP-level metrics. Dispatch
//! and pool metrics are emitted by the library crates:
//!
//! - `gateway_requests_total` (counter): labels `route`, `status`
//! - `dispatch_requests_total` / `dispatch_attempts_total` (counters)
//! - `dispatch_duration_seconds` (histogram): label `result`
//! - `credential_pool_*` (gauges)

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries for `dispatch_duration_seconds`. A dispatch can span
/// several 60s upstream calls plus retry delays, hence the long tail.
const DISPATCH_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("dispatch_duration_seconds".to_string()),
            DISPATCH_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `dispatch_duration_seconds` gets explicit buckets so it renders as a
/// Prometheus histogram (with `_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a handled HTTP request.
pub fn record_request(route: &'static str, status: u16) {
    metrics::counter!("gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
}
