//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default port 9090).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `bookshelf_requests_rejected_total` - Requests short-circuited by a stage
//!   (label: reason = unauthorized | rate_limited | unsupported_media_type | bad_query)
//! - `bookshelf_spans_total` - Tracer span lifecycle events (label: event = started | finished)
//!
//! ## Histograms
//! - `bookshelf_request_duration_seconds` - Time spent below the telemetry stage
//!   (labels: method, status)
//!
//! ## Gauges
//! - `bookshelf_rate_limit_clients` - Buckets currently held by the rate limiter
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder,
//! so tests can exercise the pipeline without an exporter.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const REQUESTS_REJECTED_TOTAL: &str = "bookshelf_requests_rejected_total";
    pub const SPANS_TOTAL: &str = "bookshelf_spans_total";
    pub const REQUEST_DURATION_SECONDS: &str = "bookshelf_request_duration_seconds";
    pub const RATE_LIMIT_CLIENTS: &str = "bookshelf_rate_limit_clients";
}

/// Why a stage ended a request early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unauthorized,
    RateLimited,
    UnsupportedMediaType,
    BadQuery,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Unauthorized => "unauthorized",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::UnsupportedMediaType => "unsupported_media_type",
            RejectReason::BadQuery => "bad_query",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// Sets up metric descriptions and starts the Prometheus HTTP listener on
/// `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::REQUESTS_REJECTED_TOTAL,
        "Total number of requests rejected by a pipeline stage"
    );
    describe_counter!(
        names::SPANS_TOTAL,
        "Total number of tracer span lifecycle events"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds below the telemetry stage"
    );
    describe_gauge!(
        names::RATE_LIMIT_CLIENTS,
        "Number of client buckets held by the rate limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_rejection(reason: RejectReason) {
    counter!(names::REQUESTS_REJECTED_TOTAL, "reason" => reason.as_str()).increment(1);
}

pub fn record_span_event(event: &'static str) {
    counter!(names::SPANS_TOTAL, "event" => event).increment(1);
}

/// Record HTTP request duration.
pub fn record_request_duration(method: &str, status: u16, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Update the tracked-clients gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_rate_limit_clients(count: usize) {
    gauge!(names::RATE_LIMIT_CLIENTS).set(count as f64);
}
