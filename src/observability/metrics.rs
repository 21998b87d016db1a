//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define the sink the proxy handler reports latency samples to
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-target and aggregate request latency
//!
//! # Metrics
//! - `proxy_target_duration_seconds` (histogram): latency per target, labelled by service and target URL
//! - `proxy_request_duration_seconds` (histogram): latency across all forwarded requests

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::Target;

/// Receiver of latency samples emitted by the proxy handler.
pub trait MetricsSink: Send + Sync + 'static {
    /// A forward to `target` finished after `elapsed`.
    fn record_target(&self, target: &Target, elapsed: Duration);

    /// Any forwarded request finished after `elapsed`.
    fn record_request(&self, elapsed: Duration);
}

/// Sink that forwards samples to the global `metrics` recorder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusSink;

impl MetricsSink for PrometheusSink {
    fn record_target(&self, target: &Target, elapsed: Duration) {
        metrics::histogram!(
            "proxy_target_duration_seconds",
            "service" => target.service().to_string(),
            "target" => target.url().to_string(),
        )
        .record(elapsed.as_secs_f64());
    }

    fn record_request(&self, elapsed: Duration) {
        metrics::histogram!("proxy_request_duration_seconds").record(elapsed.as_secs_f64());
    }
}

/// Sink that discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_target(&self, _target: &Target, _elapsed: Duration) {}

    fn record_request(&self, _elapsed: Duration) {}
}

/// Install the Prometheus recorder and start its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}
