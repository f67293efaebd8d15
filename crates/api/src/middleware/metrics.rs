//! Prometheus metrics middleware.
//!
//! Records HTTP request metrics and exposes everything recorded through the
//! `metrics` facade, including the booking engine's business counters.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const REQUEST_DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];

/// Error raised while installing the Prometheus recorder.
#[derive(Debug, thiserror::Error)]
pub enum MetricsInitError {
    #[error("failed to build Prometheus recorder: {0}")]
    Build(#[from] BuildError),

    #[error("Prometheus recorder already initialized")]
    AlreadyInitialized,
}

/// Middleware to record HTTP request metrics.
///
/// Records the following metrics:
/// - `http_requests_total`: Counter with labels (method, path, status)
/// - `http_request_duration_seconds`: Histogram with labels (method, path)
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = method_to_str(req.method());
    // Matched route template keeps label cardinality bounded
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(
        "http_requests_total",
        "method" => method,
        "path" => path.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(duration);

    response
}

/// Convert HTTP method to string for metric labels.
fn method_to_str(method: &Method) -> &'static str {
    match *method {
        Method::GET => "GET",
        Method::POST => "POST",
        Method::PUT => "PUT",
        Method::DELETE => "DELETE",
        Method::PATCH => "PATCH",
        Method::HEAD => "HEAD",
        Method::OPTIONS => "OPTIONS",
        _ => "OTHER",
    }
}

/// Handler for /metrics endpoint that returns Prometheus text format.
pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}

fn describe_metrics() {
    describe_counter!("http_requests_total", "HTTP requests by method, path and status");
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request latency by method and path"
    );
    describe_counter!("lessons_created_total", "Lesson instances created");
    describe_counter!("bookings_created_total", "Bookings admitted");
    describe_counter!(
        "bookings_rejected_total",
        "Booking requests rejected, by reason"
    );
    describe_counter!("bookings_cancelled_total", "Bookings cancelled, by actor");
    describe_counter!(
        "payments_reconciled_total",
        "Payment reconciliations, by outcome"
    );
    describe_counter!("refunds_issued_total", "Refund attempts, by result");
    describe_counter!(
        "lesson_invariant_violations_total",
        "Lessons quarantined after an invariant violation"
    );
    describe_gauge!("database_connections_active", "Active database connections");
    describe_gauge!("database_connections_idle", "Idle database connections");
    describe_gauge!("database_connections_total", "Open database connections");
}

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once during startup, before any metric is recorded.
pub fn init_metrics() -> Result<(), MetricsInitError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(REQUEST_DURATION_BUCKETS)?
        .install_recorder()?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsInitError::AlreadyInitialized)?;

    describe_metrics();
    Ok(())
}
