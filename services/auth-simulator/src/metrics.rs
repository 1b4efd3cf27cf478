//! Prometheus metrics exposition
//!
//! Series emitted by the session controller:
//!
//! - `auth_transitions_total` (counter): label `event`
//! - `auth_errors_total` (counter): label `kind`
//! - `auth_guard_redirects_total` (counter): label `path`
//! - `auth_exchange_duration_seconds` (histogram)
//!
//! and by this service:
//!
//! - `auth_http_requests_total` (counter): labels `route`, `status`

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket boundaries for the exchange histogram, from 50ms up to the
/// default 30s exchange timeout.
const EXCHANGE_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full("auth_exchange_duration_seconds".to_string()),
        EXCHANGE_BUCKETS,
    )
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `auth_exchange_duration_seconds` renders as a histogram with `_bucket`
/// lines rather than the default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record an HTTP request served by the simulator.
pub fn record_request(route: &str, status: u16) {
    metrics::counter!(
        "auth_http_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder()
        .expect("failed to set histogram buckets")
        .build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
