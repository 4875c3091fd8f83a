//! Route handlers: the ping gateway plus health, liveness, and readiness.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Map, Value};

use duplex_core::messages::PingResponse;

use super::error::ApiError;
use super::middleware::RequestScope;
use super::HttpState;

/// `GET /api/ping` -- same business call as the RPC `Ping` method.
///
/// # Errors
///
/// [`ApiError::Internal`] when the service fails.
pub async fn ping_handler(
    State(state): State<HttpState>,
    RequestScope(ctx): RequestScope,
) -> Result<Json<PingResponse>, ApiError> {
    let message = state.services.ping().ping(&ctx).await?;
    Ok(Json(PingResponse { message }))
}

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether every server is listening.
pub async fn health_handler(State(state): State<HttpState>) -> Json<Value> {
    let servers: Map<String, Value> = state
        .readiness
        .states()
        .into_iter()
        .map(|(name, server)| (name.to_string(), Value::from(server.as_str())))
        .collect();

    Json(json!({
        "state": if state.readiness.is_ready() { "ready" } else { "not_ready" },
        "servers": servers,
        "in_flight": state.readiness.in_flight(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe -- always returns 200 OK while the process serves HTTP.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- 200 only while both the RPC and HTTP servers listen.
pub async fn readiness_handler(State(state): State<HttpState>) -> StatusCode {
    if state.readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
