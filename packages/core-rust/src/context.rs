//! Per-request context handed to handlers: trace id, request logger, cancellation.

use opentelemetry::trace::TraceId;
use tokio_util::sync::CancellationToken;

use crate::logger::Logger;

/// Per-request context created by the interceptor and handed to exactly one handler.
///
/// Carries the method being served, the trace identifier of the request's
/// span (all zeros when tracing was inactive), a logger correlated with that
/// trace, the OpenTelemetry context for starting child spans, and the token
/// that fires when the server force-closes in-flight work.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: String,
    trace_id: TraceId,
    logger: Logger,
    trace: opentelemetry::Context,
    cancellation: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(
        method: String,
        trace_id: TraceId,
        logger: Logger,
        trace: opentelemetry::Context,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            method,
            trace_id,
            logger,
            trace,
            cancellation,
        }
    }

    /// An un-correlated context for a handler that was reached without the
    /// interceptor running first.
    #[must_use]
    pub fn detached(method: impl Into<String>) -> Self {
        Self::new(
            method.into(),
            TraceId::INVALID,
            Logger::detached(),
            opentelemetry::Context::new(),
            CancellationToken::new(),
        )
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// OpenTelemetry context whose active span is the request's server span.
    #[must_use]
    pub fn trace_context(&self) -> &opentelemetry::Context {
        &self.trace
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The request was cancelled before its handler finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request cancelled")]
pub struct Cancelled;
