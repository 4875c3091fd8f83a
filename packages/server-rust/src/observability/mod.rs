//! Logger and tracer factories.

pub mod logging;
pub mod telemetry;

pub use logging::{init_logging, LoggingError, SERVICE_NAME};
pub use telemetry::{LogSpanExporter, Telemetry, TelemetryError};

/// Interceptor bound to the SDK tracer the process builds at startup.
pub type ServerInterceptor = duplex_core::Interceptor<opentelemetry_sdk::trace::Tracer>;
