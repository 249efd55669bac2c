//! Admission middleware.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::error;

use super::AppState;
use crate::admission::{RequestIdentity, Verdict};

const UNAVAILABLE_DETAIL: &str = "Admission control unavailable";

/// Runs every request through the admission pipeline before the handler.
///
/// Rejections become 429 with a `detail` body. A store failure that the
/// pipeline does not absorb becomes 503.
pub async fn admission_gate(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = RequestIdentity::from_headers(request.headers(), peer);
    let path = request.uri().path().to_string();

    let verdict = state
        .pipeline
        .admit(&identity, &path, move || next.run(request))
        .await;

    match verdict {
        Ok(Verdict::Admitted(response)) => response,
        Ok(Verdict::Rejected(reason)) => {
            detail_response(StatusCode::TOO_MANY_REQUESTS, reason.detail())
        }
        Err(e) => {
            error!(
                error = %e,
                client = %identity.client_ip,
                path = %path,
                "Admission check failed"
            );
            detail_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_DETAIL)
        }
    }
}

fn detail_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}
