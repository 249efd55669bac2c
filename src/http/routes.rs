//! Router construction and handlers.

use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::gate::admission_gate;
use super::AppState;

/// Build the service router.
///
/// `/metrics` and `/health` bypass the gate. Everything else, unknown paths
/// included, is admitted first.
pub fn router(state: AppState) -> Router {
    let gated = Router::new()
        .route("/", get(home))
        .route("/search", get(search))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), admission_gate));

    Router::new()
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
        .merge(gated)
}

async fn home() -> Json<Value> {
    Json(json!({ "status": "ok", "info": "API protection demo" }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default = "default_query")]
    q: String,
}

fn default_query() -> String {
    "test".to_string()
}

async fn search(Query(params): Query<SearchParams>) -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    Json(json!({ "q": params.q, "results": ["one", "two", "three"] }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "detail": "Not Found" }))).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, state.metrics.content_type())], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
