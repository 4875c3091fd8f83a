//! HTTP middleware: the transport-level Tower stack and the request
//! interceptor glue.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the way
//! in, and the response last on the way out).

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use axum::extract::{FromRequestParts, MatchedPath, Request, State};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use opentelemetry::propagation::Extractor;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use duplex_core::{CallInfo, Cancelled, RequestContext};

use super::error::{ApiError, HandlerFailure};
use crate::config::HttpServerConfig;
use crate::network::ShutdownController;
use crate::observability::ServerInterceptor;

/// Response header echoing the request's trace id.
pub const TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

// ---------------------------------------------------------------------------
// Transport layers
// ---------------------------------------------------------------------------

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<SetRequestIdLayer<MakeRequestUuid>, tower::layer::util::Identity>,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` to every incoming request
/// 2. `Timeout` -- enforces a maximum request processing duration
/// 3. `PropagateRequestId` -- copies `X-Request-Id` from the request to the response
#[must_use]
pub fn build_http_layers(config: &HttpServerConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

// ---------------------------------------------------------------------------
// Interceptor glue
// ---------------------------------------------------------------------------

/// State of the interceptor middleware.
#[derive(Clone)]
pub struct InterceptState {
    pub interceptor: Arc<ServerInterceptor>,
    pub controller: Arc<ShutdownController>,
}

/// Adapts request headers to the propagator's carrier interface.
struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

/// Outcome of a request that did not succeed, as seen by the interceptor.
enum FailedResponse {
    Handler { response: Response, message: String },
    Cancelled,
}

impl fmt::Display for FailedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler { message, .. } => f.write_str(message),
            Self::Cancelled => fmt::Display::fmt(&Cancelled, f),
        }
    }
}

impl From<Cancelled> for FailedResponse {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl IntoResponse for FailedResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Handler { response, .. } => response,
            Self::Cancelled => ApiError::Cancelled.into_response(),
        }
    }
}

/// Runs the shared interceptor around the rest of the HTTP stack.
///
/// The [`RequestContext`] travels to handlers as a request extension; the
/// response carries the trace id in `x-trace-id`.
pub async fn intercept_request(
    State(state): State<InterceptState>,
    mut request: Request,
    next: Next,
) -> Response {
    let _in_flight = state.controller.in_flight_guard();
    let parent = state
        .interceptor
        .extract_parent(&HeaderExtractor(request.headers()));
    // Route template including the `/api` prefix that nesting strips from the URI.
    let method = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str)
        .to_string();
    let call = CallInfo::new(method).with_cancellation(state.controller.request_token());

    let result = state
        .interceptor
        .intercept(call, parent, |ctx| async move {
            let trace_id = ctx.trace_id();
            request.extensions_mut().insert(ctx);

            let mut response = next.run(request).await;
            if let Ok(value) = HeaderValue::from_str(&trace_id.to_string()) {
                response.headers_mut().insert(TRACE_ID_HEADER, value);
            }
            match response.extensions_mut().remove::<HandlerFailure>() {
                Some(HandlerFailure(message)) => Err(FailedResponse::Handler { response, message }),
                None => Ok(response),
            }
        })
        .await;

    result.unwrap_or_else(IntoResponse::into_response)
}

// ---------------------------------------------------------------------------
// RequestContext extractor
// ---------------------------------------------------------------------------

/// Extracts the interceptor's [`RequestContext`].
///
/// If the interceptor did not run for this route, handlers still get a
/// context: a detached one with an all-zero trace id and no bound fields.
#[derive(Debug, Clone)]
pub struct RequestScope(pub RequestContext);

impl<S: Send + Sync> FromRequestParts<S> for RequestScope {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ctx) = parts.extensions.get::<RequestContext>() {
            return Ok(Self(ctx.clone()));
        }
        tracing::warn!(path = %parts.uri.path(), "request context missing, logging un-correlated");
        Ok(Self(RequestContext::detached(parts.uri.path())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn build_http_layers_with_defaults() {
        let config = test_config(&[]);
        let _layers = build_http_layers(&config.http_server);
    }

    #[test]
    fn header_extractor_reads_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static("00-abc-def-01"));
        let extractor = HeaderExtractor(&headers);

        assert_eq!(extractor.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(extractor.keys(), vec!["traceparent"]);
        assert_eq!(extractor.get("tracestate"), None);
    }

    #[tokio::test]
    async fn missing_context_degrades_to_detached() {
        let (mut parts, ()) = axum::http::Request::builder()
            .uri("/api/ping")
            .body(())
            .unwrap()
            .into_parts();

        let RequestScope(ctx) = RequestScope::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(ctx.method(), "/api/ping");
        assert_eq!(ctx.trace_id(), opentelemetry::trace::TraceId::INVALID);
    }
}
