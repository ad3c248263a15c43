// Module: http
// Demo HTTP surface around the audit relay

pub mod demo;
pub mod error;
pub mod health;
pub mod middleware;
pub mod websocket;

use axum::{middleware::from_fn, middleware::from_fn_with_state, routing::get, Router};
use prometheus::Registry;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use cake_relay::{AuditSender, SubscriberHub};

use crate::observability::{metrics, metrics_middleware::metrics_layer};

pub use error::AppError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub audit: AuditSender,
    pub hub: SubscriberHub,
    pub registry: Registry,
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    // Only these routes produce audit lines
    let audited = demo::create_demo_router()
        .route_layer(from_fn_with_state(state.clone(), middleware::audit_layer));

    let router = Router::new()
        // Health check endpoints (for monitoring probes)
        .merge(health::create_health_router())
        .merge(audited)
        .route("/metrics", get(metrics::metrics_handler))
        // Live tail of audit lines
        .route("/ws", get(websocket::live_tail_handler));

    // Apply layers before state
    let router = router
        .layer(from_fn(metrics_layer))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Apply state to all routes (must be last)
    router.with_state(state)
}
