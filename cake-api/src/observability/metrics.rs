//! Prometheus metrics for the HTTP surface
//!
//! HTTP request metrics live in process-wide statics and are registered,
//! together with the audit relay's metrics, into the registry served on
//! `/metrics`.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tracing::error;

use cake_relay::RelayMetrics;

use crate::http::AppState;

// --- HTTP Metrics ---

/// Total HTTP requests, labeled by method, path, and status code.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("failed to create http_requests_total")
});

/// HTTP request duration in seconds, labeled by method and path.
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "path"],
    )
    .expect("failed to create http_request_duration_seconds")
});

/// Number of in-flight HTTP requests.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .expect("failed to create http_requests_in_flight")
});

// --- Live tail ---

/// Total live-tail WebSocket connections opened.
pub static LIVE_TAIL_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "live_tail_connections_total",
        "Total number of live-tail WebSocket connections opened",
    )
    .expect("failed to create live_tail_connections_total")
});

/// Build the registry served on `/metrics`
pub fn build_registry(relay: &RelayMetrics) -> prometheus::Result<Registry> {
    let registry = Registry::new();
    registry.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    registry.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))?;
    registry.register(Box::new(LIVE_TAIL_CONNECTIONS_TOTAL.clone()))?;
    relay.register(&registry)?;
    Ok(registry)
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics(registry: &Registry) -> prometheus::Result<String> {
    TextEncoder::new().encode_to_string(&registry.gather())
}

/// `GET /metrics`
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match gather_metrics(&state.registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                String::new(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_exposes_http_and_relay_metrics() {
        let relay = RelayMetrics::new();
        let registry = build_registry(&relay).unwrap();

        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/cake", "200"])
            .inc();
        relay.jobs_submitted.inc();

        let text = gather_metrics(&registry).unwrap();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("audit_jobs_submitted_total 1"));
    }
}
