use duplex_core::{ResolveError, StartError};

use crate::config::ConfigError;
use crate::observability::LoggingError;

/// Failures that end the process before it serves anything.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("component graph is invalid: {0}")]
    Resolve(#[from] ResolveError),

    #[error("startup failed: {0}")]
    Start(#[from] StartError),
}
