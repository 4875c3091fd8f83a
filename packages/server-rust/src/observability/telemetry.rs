//! Tracer provider and W3C trace-context plus baggage propagation.
//!
//! The provider is built once per process from [`TracingConfig`] and passed
//! explicitly to whoever starts spans. Its start hook additionally installs it
//! as the OpenTelemetry global provider and propagator for libraries that
//! look there; that install happens at most once per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{self, Tracer, TracerProvider};
use opentelemetry_sdk::Resource;

use duplex_core::{Component, StopContext};

use super::logging::SERVICE_NAME;
use crate::config::TracingConfig;

static GLOBAL_INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("a global tracer provider was already installed by this process")]
    AlreadyInstalled,
}

/// Owns the tracer provider of the process.
pub struct Telemetry {
    provider: TracerProvider,
    tracer: Tracer,
    propagator: Arc<TextMapCompositePropagator>,
    collector_endpoint: String,
    installed_global: AtomicBool,
}

impl Telemetry {
    /// Builds the provider with the service resource and, when `log_spans`
    /// is set, an exporter that writes finished spans to the log.
    #[must_use]
    pub fn new(config: &TracingConfig) -> Self {
        let collector_endpoint = config.collector_endpoint();
        let mut builder = TracerProvider::builder()
            .with_config(trace::config().with_resource(build_resource(config)));
        if config.log_spans {
            builder = builder.with_simple_exporter(LogSpanExporter);
        }
        let provider = builder.build();
        let tracer = provider.tracer(SERVICE_NAME);

        Self {
            provider,
            tracer,
            propagator: Arc::new(build_propagator()),
            collector_endpoint,
            installed_global: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone()
    }

    #[must_use]
    pub fn propagator(&self) -> Arc<dyn TextMapPropagator + Send + Sync> {
        self.propagator.clone()
    }

    #[must_use]
    pub fn collector_endpoint(&self) -> &str {
        &self.collector_endpoint
    }

    /// Installs this provider and the W3C propagators as the process globals.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::AlreadyInstalled`] if any `Telemetry` in this
    /// process already did so; the existing globals are left untouched.
    pub fn install_global(&self) -> Result<(), TelemetryError> {
        GLOBAL_INSTALLED
            .set(())
            .map_err(|()| TelemetryError::AlreadyInstalled)?;
        global::set_text_map_propagator(build_propagator());
        global::set_tracer_provider(self.provider.clone());
        self.installed_global.store(true, Ordering::Release);
        Ok(())
    }
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("collector_endpoint", &self.collector_endpoint)
            .field(
                "installed_global",
                &self.installed_global.load(Ordering::Acquire),
            )
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Component for Telemetry {
    async fn start(&self) -> anyhow::Result<()> {
        match self.install_global() {
            Ok(()) => tracing::info!(
                endpoint = %self.collector_endpoint,
                "tracer provider installed"
            ),
            Err(err) => tracing::warn!(error = %err, "keeping existing global tracer provider"),
        }
        Ok(())
    }

    async fn stop(&self, _ctx: &StopContext) -> anyhow::Result<()> {
        let failures: Vec<_> = self
            .provider
            .force_flush()
            .into_iter()
            .filter_map(Result::err)
            .collect();
        if self.installed_global.swap(false, Ordering::AcqRel) {
            global::shutdown_tracer_provider();
        }
        if let Some(first) = failures.first() {
            anyhow::bail!("failed to flush {} span processor(s): {first}", failures.len());
        }
        Ok(())
    }
}

/// W3C `traceparent`/`tracestate` plus W3C `baggage`.
fn build_propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ])
}

fn build_resource(config: &TracingConfig) -> Resource {
    Resource::new([
        KeyValue::new("service.name", SERVICE_NAME),
        KeyValue::new("deployment.environment", config.environment.clone()),
    ])
}

// ---------------------------------------------------------------------------
// LogSpanExporter
// ---------------------------------------------------------------------------

/// Writes each finished span as a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpanExporter;

impl SpanExporter for LogSpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        for span in &batch {
            let duration_us = span
                .end_time
                .duration_since(span.start_time)
                .unwrap_or_default()
                .as_micros();
            let started = span
                .start_time
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            tracing::debug!(
                trace_id = %span.span_context.trace_id(),
                span_id = %span.span_context.span_id(),
                parent_span_id = %span.parent_span_id,
                name = %span.name,
                kind = ?span.span_kind,
                status = ?span.status,
                started_unix_ms = started,
                duration_us,
                "span finished"
            );
        }
        Box::pin(std::future::ready(Ok(())))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use opentelemetry::trace::{Span as _, TraceContextExt, Tracer as _};
    use opentelemetry::{Key, Value};
    use tracing_test::traced_test;

    use super::*;
    use crate::config::tests::test_config;

    #[test]
    fn resource_names_service_and_environment() {
        let resource = build_resource(&test_config(&[]).tracing);

        assert_eq!(
            resource.get(Key::from_static_str("service.name")),
            Some(Value::from(SERVICE_NAME))
        );
        assert_eq!(
            resource.get(Key::from_static_str("deployment.environment")),
            Some(Value::from("production"))
        );
    }

    #[test]
    fn tracer_starts_valid_root_spans() {
        let telemetry = Telemetry::new(&test_config(&[]).tracing);
        let span = telemetry.tracer().start("probe");

        assert!(span.span_context().is_valid());
        assert_eq!(
            telemetry.collector_endpoint(),
            "http://127.0.0.1:14268/api/traces"
        );
    }

    #[test]
    #[traced_test]
    fn log_spans_writes_finished_spans() {
        let telemetry = Telemetry::new(&test_config(&["--tracing-log-spans"]).tracing);
        let tracer = telemetry.tracer();

        let parent = tracer.start("parent");
        let trace_id = parent.span_context().trace_id();
        let cx = opentelemetry::Context::new().with_span(parent);
        let mut child = tracer.start_with_context("child", &cx);
        child.end();

        assert!(logs_contain("span finished"));
        assert!(logs_contain(&format!("trace_id={trace_id}")));
    }

    #[tokio::test]
    async fn stop_flushes_without_touching_globals() {
        let telemetry = Telemetry::new(&test_config(&[]).tracing);
        telemetry
            .stop(&StopContext::with_budget(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(!telemetry.installed_global.load(Ordering::Acquire));
    }

    #[test]
    fn propagator_reads_trace_context_and_baggage() {
        use opentelemetry::baggage::BaggageExt;
        use std::collections::HashMap;

        let telemetry = Telemetry::new(&test_config(&[]).tracing);
        let carrier = HashMap::from([
            (
                "traceparent".to_string(),
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
            ),
            ("baggage".to_string(), "tenant=acme".to_string()),
        ]);

        let cx = telemetry.propagator().extract(&carrier);

        assert_eq!(
            cx.span().span_context().trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(
            cx.baggage().get("tenant").map(ToString::to_string),
            Some("acme".to_string())
        );
    }
}
