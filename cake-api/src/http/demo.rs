//! Demo routes that generate audit traffic

use axum::{
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

use crate::http::AppState;

pub fn create_demo_router() -> Router<AppState> {
    Router::new()
        .route("/cake", get(get_cake))
        .route("/echo", post(echo))
}

/// The cake of the day
pub async fn get_cake() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain")], "cheesecake")
}

/// Return the JSON body unchanged
pub async fn echo(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}
