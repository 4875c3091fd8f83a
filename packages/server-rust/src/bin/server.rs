//! `duplex-server` entry point.

use std::process::ExitCode;

use duplex_server::app::{termination, App};
use duplex_server::config::{Config, ConfigError};
use duplex_server::observability::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(ConfigError::Parse(err)) => err.exit(),
        Err(err) => {
            eprintln!("duplex-server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let logger = match init_logging(&config.log) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("duplex-server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let app = match App::build(config, logger.clone()) {
        Ok(app) => app,
        Err(err) => {
            tracing::error!(parent: logger.span(), error = %err, "boot failed");
            return ExitCode::FAILURE;
        }
    };

    match app.run(termination()).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(parent: logger.span(), error = %err, "boot failed");
            ExitCode::FAILURE
        }
    }
}
