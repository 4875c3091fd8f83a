//! Structured logger handle.
//!
//! A [`Logger`] is a `tracing` span whose fields are attached to every event
//! emitted under it. The process-wide logger carries the service name;
//! request loggers are children that add the `trace_id`.

use opentelemetry::trace::TraceId;
use tracing::Span;

/// Cheap-to-clone handle binding structured fields to log events.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Creates the root logger of a service.
    ///
    /// The root span is created in the caller's current span, so it must be
    /// built after the subscriber has been installed.
    #[must_use]
    pub fn new(service: &'static str) -> Self {
        Self {
            span: tracing::info_span!("service", name = service),
        }
    }

    /// A logger with no bound fields. Events still reach the installed subscriber.
    #[must_use]
    pub fn detached() -> Self {
        Self { span: Span::none() }
    }

    /// Derives a child logger that tags every event with `trace_id`.
    #[must_use]
    pub fn with_trace_id(&self, trace_id: TraceId) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "request", trace_id = %trace_id),
        }
    }

    /// Span to use as `parent:` for events or to instrument futures with.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::detached()
    }
}
