//! Mapping of service failures to HTTP status codes and JSON error bodies.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use duplex_core::Cancelled;

/// Failure message a handler attached to its response, for the request summary.
#[derive(Debug, Clone)]
pub struct HandlerFailure(pub String);

/// Handler error translated into an HTTP status and a JSON body.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("request cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}

impl From<Cancelled> for ApiError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, public) = match &self {
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal server error"),
            Self::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "request cancelled"),
        };
        let mut response = (status, Json(json!({ "error": public }))).into_response();
        // The full message stays server-side: it goes to the log, not the client.
        response
            .extensions_mut()
            .insert(HandlerFailure(self.to_string()));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_hides_detail_from_client() {
        let response = ApiError::from(anyhow::anyhow!("pool timed out")).into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let failure = response.extensions().get::<HandlerFailure>().unwrap();
        assert_eq!(failure.0, "internal error: pool timed out");
    }

    #[test]
    fn cancelled_maps_to_service_unavailable() {
        let response = ApiError::from(Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
