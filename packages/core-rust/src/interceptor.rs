//! Request interceptor shared by every transport.
//!
//! For each inbound call the interceptor starts a server span under the
//! caller's propagated trace context, binds a child logger carrying the
//! span's trace id, hands the resulting [`RequestContext`] to the next
//! handler, and writes exactly one `request completed` line when the handler
//! returns. Transports only supply the carrier to extract the parent context
//! from and the method name.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::{Span as _, SpanKind, Status, TraceContextExt, TraceId, Tracer};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::{Cancelled, RequestContext};
use crate::logger::Logger;

/// Transport-provided facts about one inbound call.
#[derive(Debug, Clone)]
pub struct CallInfo {
    method: String,
    cancellation: CancellationToken,
}

impl CallInfo {
    #[must_use]
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            cancellation: CancellationToken::new(),
        }
    }

    /// Ties the call to a server-owned token that fires on force-close.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// How a request ended, as reported on the summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Builds request contexts and logs one summary line per request.
pub struct Interceptor<T> {
    logger: Logger,
    tracer: T,
    propagator: Arc<dyn TextMapPropagator + Send + Sync>,
}

impl<T> Interceptor<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        logger: Logger,
        tracer: T,
        propagator: Arc<dyn TextMapPropagator + Send + Sync>,
    ) -> Self {
        Self {
            logger,
            tracer,
            propagator,
        }
    }

    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Reads the caller's trace context from transport metadata.
    ///
    /// Call this before any `.await` so the carrier borrow does not end up in
    /// the request future.
    #[must_use]
    pub fn extract_parent(&self, carrier: &dyn Extractor) -> opentelemetry::Context {
        self.propagator.extract(carrier)
    }

    /// Runs `next` inside a traced, correlated request context.
    ///
    /// If the call's cancellation token fires first, `next` is dropped and
    /// `E::from(Cancelled)` is returned. Whatever the outcome, one summary
    /// line is emitted under the request logger and the server span is ended.
    ///
    /// # Errors
    ///
    /// Returns the handler's error, or the cancellation error described above.
    pub async fn intercept<F, Fut, R, E>(
        &self,
        call: CallInfo,
        parent: opentelemetry::Context,
        next: F,
    ) -> Result<R, E>
    where
        F: FnOnce(RequestContext) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: fmt::Display + From<Cancelled>,
    {
        let started = Instant::now();
        let CallInfo {
            method,
            cancellation,
        } = call;

        let builder = self
            .tracer
            .span_builder(method.clone())
            .with_kind(SpanKind::Server);
        let span = self.tracer.build_with_context(builder, &parent);
        let span_context = span.span_context().clone();
        let trace_id = if span_context.is_valid() {
            span_context.trace_id()
        } else {
            TraceId::INVALID
        };
        let trace = parent.with_span(span);

        let logger = self.logger.with_trace_id(trace_id);
        if trace_id == TraceId::INVALID {
            tracing::debug!(parent: logger.span(), method = %method, "no active trace span");
        }

        let ctx = RequestContext::new(
            method.clone(),
            trace_id,
            logger.clone(),
            trace.clone(),
            cancellation.clone(),
        );
        let mut summary = RequestSummary {
            logger: logger.clone(),
            method,
            started,
            trace,
            done: false,
        };
        let handler = next(ctx).instrument(logger.span().clone());

        let result = tokio::select! {
            biased;
            result = handler => result,
            () = cancellation.cancelled() => Err(E::from(Cancelled)),
        };

        match &result {
            Ok(_) => summary.complete(Outcome::Ok, None),
            Err(err) if cancellation.is_cancelled() => {
                summary.complete(Outcome::Cancelled, Some(&err.to_string()));
            }
            Err(err) => summary.complete(Outcome::Error, Some(&err.to_string())),
        }

        result
    }
}

/// Writes the summary line and ends the server span exactly once.
///
/// If the request future is dropped before completing (a transport timeout,
/// a client disconnect), the line is written on drop with outcome
/// `cancelled`.
struct RequestSummary {
    logger: Logger,
    method: String,
    started: Instant,
    trace: opentelemetry::Context,
    done: bool,
}

impl RequestSummary {
    fn complete(&mut self, outcome: Outcome, error: Option<&str>) {
        if std::mem::replace(&mut self.done, true) {
            return;
        }

        let duration_us = u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX);
        let server_span = self.trace.span();
        let method = &self.method;
        match (outcome, error) {
            (Outcome::Error, Some(err)) => {
                server_span.set_status(Status::error(err.to_string()));
                tracing::error!(
                    parent: self.logger.span(),
                    method = %method,
                    duration_us,
                    outcome = %outcome,
                    error = %err,
                    "request completed"
                );
            }
            (_, Some(err)) => tracing::info!(
                parent: self.logger.span(),
                method = %method,
                duration_us,
                outcome = %outcome,
                error = %err,
                "request completed"
            ),
            (_, None) => tracing::info!(
                parent: self.logger.span(),
                method = %method,
                duration_us,
                outcome = %outcome,
                "request completed"
            ),
        }
        server_span.end();
    }
}

impl Drop for RequestSummary {
    fn drop(&mut self) {
        self.complete(Outcome::Cancelled, Some("request dropped before completion"));
    }
}

impl<T> fmt::Debug for Interceptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("logger", &self.logger)
            .field("propagator", &self.propagator)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use opentelemetry::trace::noop::NoopTracer;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::propagation::TraceContextPropagator;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::*;

    const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
    const TRACE_HEX: &str = "4bf92f3577b34da6a3ce929d0e0e4736";

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("boom: {0}")]
        Failed(&'static str),
        #[error(transparent)]
        Cancelled(#[from] Cancelled),
    }

    fn interceptor<T>(tracer: T) -> Interceptor<T>
    where
        T: Tracer + Send + Sync,
        T::Span: Send + Sync + 'static,
    {
        Interceptor::new(
            Logger::new("duplex-test"),
            tracer,
            Arc::new(TraceContextPropagator::new()),
        )
    }

    fn carrier(traceparent: Option<&str>) -> HashMap<String, String> {
        traceparent
            .map(|value| HashMap::from([("traceparent".to_string(), value.to_string())]))
            .unwrap_or_default()
    }

    #[tokio::test]
    #[traced_test]
    async fn zero_trace_id_when_no_span_is_active() {
        let interceptor = interceptor(NoopTracer::new());
        let parent = interceptor.extract_parent(&carrier(None));

        let seen = interceptor
            .intercept(CallInfo::new("/api/ping"), parent, |ctx| async move {
                Ok::<_, TestError>(ctx.trace_id())
            })
            .await
            .unwrap();

        assert_eq!(seen, TraceId::INVALID);
        assert!(logs_contain("trace_id=00000000000000000000000000000000"));
        assert!(logs_contain("no active trace span"));
        assert!(logs_contain("request completed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn propagated_trace_id_reaches_handler_and_summary() {
        let interceptor = interceptor(NoopTracer::new());
        let parent = interceptor.extract_parent(&carrier(Some(TRACEPARENT)));

        let seen = interceptor
            .intercept(CallInfo::new("/api/ping"), parent, |ctx| async move {
                tracing::info!("inside handler");
                Ok::<_, TestError>(ctx.trace_id())
            })
            .await
            .unwrap();

        assert_eq!(seen.to_string(), TRACE_HEX);
        logs_assert(|lines: &[&str]| {
            let handler_line = lines
                .iter()
                .find(|line| line.contains("inside handler"))
                .ok_or("handler line missing")?;
            if handler_line.contains(TRACE_HEX) {
                Ok(())
            } else {
                Err(format!("handler line not correlated: {handler_line}"))
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn emits_exactly_one_summary_line_with_span_trace_id() {
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let interceptor = interceptor(provider.tracer("interceptor-test"));
        let recorded = Arc::new(Mutex::new(None));

        let sink = Arc::clone(&recorded);
        interceptor
            .intercept(
                CallInfo::new("/test.TestService/Ping"),
                opentelemetry::Context::new(),
                |ctx| async move {
                    *sink.lock() = Some(ctx.trace_id());
                    Ok::<_, TestError>(())
                },
            )
            .await
            .unwrap();

        let trace_id = recorded.lock().expect("handler ran");
        assert_ne!(trace_id, TraceId::INVALID);
        let expected = format!("trace_id={trace_id}");
        logs_assert(|lines: &[&str]| {
            let summaries: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("request completed"))
                .collect();
            match summaries.as_slice() {
                [line] if line.contains(&expected) && line.contains("duration_us=") => Ok(()),
                other => Err(format!("unexpected summary lines: {other:?}")),
            }
        });
    }

    #[tokio::test]
    #[traced_test]
    async fn handler_failure_is_logged_with_its_message() {
        let interceptor = interceptor(NoopTracer::new());
        let parent = interceptor.extract_parent(&carrier(Some(TRACEPARENT)));

        let err = interceptor
            .intercept(CallInfo::new("/api/ping"), parent, |_ctx| async move {
                Err::<(), _>(TestError::Failed("db down"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Failed("db down")));
        assert!(logs_contain("outcome=error"));
        assert!(logs_contain("boom: db down"));
        assert!(logs_contain(TRACE_HEX));
    }

    #[tokio::test]
    #[traced_test]
    async fn cancellation_drops_the_handler() {
        let interceptor = interceptor(NoopTracer::new());
        let token = CancellationToken::new();
        token.cancel();

        let err = interceptor
            .intercept(
                CallInfo::new("/api/ping").with_cancellation(token),
                opentelemetry::Context::new(),
                |_ctx| std::future::pending::<Result<(), TestError>>(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TestError::Cancelled(Cancelled)));
        assert!(logs_contain("outcome=cancelled"));
    }

    #[tokio::test]
    #[traced_test]
    async fn dropped_request_still_writes_one_summary_line() {
        let interceptor = interceptor(NoopTracer::new());
        let parent = interceptor.extract_parent(&carrier(Some(TRACEPARENT)));

        let request = interceptor.intercept(CallInfo::new("/api/ping"), parent, |_ctx| {
            std::future::pending::<Result<(), TestError>>()
        });
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), request).await;

        assert!(timed_out.is_err());
        logs_assert(|lines: &[&str]| {
            let summaries: Vec<_> = lines
                .iter()
                .filter(|line| line.contains("request completed"))
                .collect();
            match summaries.as_slice() {
                [line]
                    if line.contains("outcome=cancelled")
                        && line.contains("request dropped before completion")
                        && line.contains(TRACE_HEX) =>
                {
                    Ok(())
                }
                other => Err(format!("unexpected summary lines: {other:?}")),
            }
        });
    }
}
