//! Process-wide structured logging.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use duplex_core::Logger;

use crate::config::{LogConfig, LogFormat};

/// Name bound to the root logger and reported as the tracing resource.
pub const SERVICE_NAME: &str = "duplex";

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter `{directive}`: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("a global subscriber is already installed")]
    AlreadyInstalled(#[source] tracing_subscriber::util::TryInitError),
}

/// Builds the filter: `RUST_LOG` when set, otherwise the configured level.
///
/// # Errors
///
/// Returns [`LoggingError::Filter`] if the configured directive does not parse.
pub fn build_env_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|source| LoggingError::Filter {
        directive: config.level.clone(),
        source,
    })
}

/// Installs the global subscriber and returns the root [`Logger`].
///
/// JSON output includes the current span and the full span list so that the
/// `trace_id` bound by request loggers appears on every request line.
///
/// # Errors
///
/// Returns [`LoggingError`] for a bad filter or when a subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<Logger, LoggingError> {
    let filter = build_env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    }
    .map_err(LoggingError::AlreadyInstalled)?;

    Ok(Logger::new(SERVICE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_config(level: &str) -> LogConfig {
        LogConfig {
            level: level.to_string(),
            format: LogFormat::Json,
        }
    }

    #[test]
    fn invalid_directive_is_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = build_env_filter(&log_config("duplex=loudest")).unwrap_err();
        assert!(matches!(err, LoggingError::Filter { .. }));
    }

    #[test]
    fn level_directive_builds_filter() {
        assert!(build_env_filter(&log_config("info,duplex_server=debug")).is_ok());
    }
}
