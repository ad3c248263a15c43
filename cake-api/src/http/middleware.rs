// HTTP middleware

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{AppError, AppState};

/// Largest request body the audit layer will buffer
pub const MAX_AUDITED_BODY: usize = 1024 * 1024;

/// Format one audit line for a completed request
#[must_use]
pub fn format_audit_line(
    path: &str,
    status: u16,
    elapsed: Duration,
    params: &[u8],
    response: &[u8],
) -> String {
    format!(
        "PATH: {path} -> {status}. Finished in {elapsed:?}.\n\tParams: {}\n\tResponse: {}",
        String::from_utf8_lossy(params),
        String::from_utf8_lossy(response),
    )
}

/// Audit middleware
///
/// Buffers the request and response bodies, lets the request through
/// unchanged, logs a summary line and queues it on the audit relay. Queueing
/// waits only while the relay intake is full; a stopped relay is ignored.
pub async fn audit_layer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_string();

    let (parts, body) = request.into_parts();
    let params = to_bytes(body, MAX_AUDITED_BODY).await.map_err(|e| {
        warn!(path = %path, error = %e, "Could not read request body");
        AppError::bad_request("Could not read request")
    })?;
    let request = Request::from_parts(parts, Body::from(params.clone()));

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    let (parts, body) = response.into_parts();
    let captured = to_bytes(body, usize::MAX).await.map_err(|e| {
        warn!(path = %path, error = %e, "Could not read response body");
        AppError::internal_server_error("Internal server error")
    })?;

    let line = format_audit_line(&path, parts.status.as_u16(), elapsed, &params, &captured);
    info!(target: "audit", "{line}");
    if let Err(e) = state.audit.submit(line).await {
        warn!(path = %path, error = %e, "Audit relay unavailable, line only logged locally");
    }

    Ok(Response::from_parts(parts, Body::from(captured)))
}
