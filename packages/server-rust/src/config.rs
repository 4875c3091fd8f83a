//! Process configuration.
//!
//! Every setting can be given as a flag or an environment variable. Secrets
//! and connection targets have no default, so a missing value fails the
//! process at load time. Tunables carry packaged defaults.

use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};
use sqlx::postgres::PgSslMode;

/// Root configuration tree, immutable after [`Config::load`].
#[derive(Debug, Clone, Parser)]
#[command(name = "duplex-server", version, about = "Ping service over RPC and HTTP")]
pub struct Config {
    #[command(flatten)]
    pub database: DatabaseConfig,
    #[command(flatten)]
    pub tracing: TracingConfig,
    #[command(flatten)]
    pub rpc_server: RpcServerConfig,
    #[command(flatten)]
    pub http_server: HttpServerConfig,
    #[command(flatten)]
    pub log: LogConfig,
    #[command(flatten)]
    pub lifecycle: LifecycleConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `PostgreSQL` connection target and pool sizing.
#[derive(Debug, Clone, Args)]
pub struct DatabaseConfig {
    #[arg(id = "postgres_host", long = "postgres-host", env = "POSTGRES_HOST")]
    pub host: String,
    #[arg(id = "postgres_port", long = "postgres-port", env = "POSTGRES_PORT")]
    pub port: u16,
    #[arg(id = "postgres_user", long = "postgres-user", env = "POSTGRES_USER")]
    pub user: String,
    #[arg(
        id = "postgres_password",
        long = "postgres-password",
        env = "POSTGRES_PASSWORD",
        hide_env_values = true
    )]
    pub password: String,
    #[arg(id = "postgres_db", long = "postgres-db", env = "POSTGRES_DB")]
    pub db_name: String,
    /// One of `disable`, `allow`, `prefer`, `require`, `verify-ca`, `verify-full`.
    #[arg(id = "postgres_sslmode", long = "postgres-sslmode", env = "POSTGRES_SSLMODE")]
    pub ssl_mode: String,
    #[arg(
        id = "postgres_max_conns",
        long = "postgres-max-conns",
        env = "POSTGRES_MAX_CONNS",
        default_value_t = 10
    )]
    pub max_conns: u32,
    #[arg(
        id = "postgres_min_conns",
        long = "postgres-min-conns",
        env = "POSTGRES_MIN_CONNS",
        default_value_t = 1
    )]
    pub min_conns: u32,
    /// Upper bound for the boot-time liveness probe.
    #[arg(
        id = "postgres_probe_timeout_secs",
        long = "postgres-probe-timeout-secs",
        env = "POSTGRES_PROBE_TIMEOUT_SECS",
        default_value_t = 5
    )]
    pub probe_timeout_secs: u64,
}

impl DatabaseConfig {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Parses `ssl_mode` into the driver's representation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown mode.
    pub fn ssl_mode(&self) -> Result<PgSslMode, ConfigError> {
        PgSslMode::from_str(&self.ssl_mode).map_err(|_| ConfigError::Invalid {
            field: "database.ssl_mode",
            reason: format!("unknown ssl mode `{}`", self.ssl_mode),
        })
    }
}

/// Span pipeline settings.
#[derive(Debug, Clone, Args)]
pub struct TracingConfig {
    /// Also write every finished span to the log.
    #[arg(id = "tracing_log_spans", long = "tracing-log-spans", env = "TRACING_LOG_SPANS")]
    pub log_spans: bool,
    #[arg(id = "jaeger_agent_host", long = "jaeger-agent-host", env = "JAEGER_AGENT_HOST")]
    pub collector_host: String,
    #[arg(id = "jaeger_agent_port", long = "jaeger-agent-port", env = "JAEGER_AGENT_PORT")]
    pub collector_port: u16,
    #[arg(
        id = "deployment_environment",
        long = "deployment-environment",
        env = "DEPLOYMENT_ENVIRONMENT",
        default_value = "production"
    )]
    pub environment: String,
}

impl TracingConfig {
    /// HTTP endpoint spans are addressed to.
    #[must_use]
    pub fn collector_endpoint(&self) -> String {
        format!(
            "http://{}:{}/api/traces",
            self.collector_host, self.collector_port
        )
    }
}

#[derive(Debug, Clone, Args)]
pub struct RpcServerConfig {
    #[arg(id = "rpc_host", long = "rpc-host", env = "RPC_SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,
    #[arg(id = "rpc_port", long = "rpc-port", env = "RPC_SERVER_PORT", default_value_t = 9090)]
    pub port: u16,
}

impl RpcServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Args)]
pub struct HttpServerConfig {
    #[arg(id = "http_host", long = "http-host", env = "HTTP_SERVER_HOST", default_value = "0.0.0.0")]
    pub host: String,
    #[arg(id = "http_port", long = "http-port", env = "HTTP_SERVER_PORT", default_value_t = 8080)]
    pub port: u16,
    /// Maximum time to wait for a request to complete.
    #[arg(
        id = "http_request_timeout_secs",
        long = "http-request-timeout-secs",
        env = "HTTP_REQUEST_TIMEOUT_SECS",
        default_value_t = 30
    )]
    pub request_timeout_secs: u64,
}

impl HttpServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable, for local development.
    Pretty,
}

#[derive(Debug, Clone, Args)]
pub struct LogConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[arg(id = "log_level", long = "log-level", env = "LOG_LEVEL", default_value = "info")]
    pub level: String,
    #[arg(
        id = "log_format",
        long = "log-format",
        env = "LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Json
    )]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Args)]
pub struct LifecycleConfig {
    /// Budget for each component's stop hook.
    #[arg(
        id = "stop_timeout_secs",
        long = "stop-timeout-secs",
        env = "STOP_TIMEOUT_SECS",
        default_value_t = 10
    )]
    pub stop_timeout_secs: u64,
    /// How long boot waits for both listeners to report readiness.
    #[arg(
        id = "ready_timeout_secs",
        long = "ready-timeout-secs",
        env = "READY_TIMEOUT_SECS",
        default_value_t = 5
    )]
    pub ready_timeout_secs: u64,
}

impl LifecycleConfig {
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Parse(#[from] clap::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Config {
    /// Reads flags and environment of the current process, then validates.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for missing or malformed values (including
    /// `--help`/`--version` requests), [`ConfigError::Invalid`] when values
    /// parse but contradict each other.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Self::try_parse()?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`Config::load`] but with explicit arguments.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_from<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config = Self::try_parse_from(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks constraints between fields.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint as [`ConfigError::Invalid`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.max_conns == 0 {
            return Err(ConfigError::Invalid {
                field: "database.max_conns",
                reason: "must be at least 1".to_string(),
            });
        }
        if db.min_conns > db.max_conns {
            return Err(ConfigError::Invalid {
                field: "database.min_conns",
                reason: format!(
                    "{} exceeds max_conns {}",
                    db.min_conns, db.max_conns
                ),
            });
        }
        if db.probe_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "database.probe_timeout_secs",
                reason: "the liveness probe needs a finite, non-zero timeout".to_string(),
            });
        }
        db.ssl_mode()?;

        if self.rpc_server.port != 0 && self.rpc_server.address() == self.http_server.address() {
            return Err(ConfigError::Invalid {
                field: "rpc_server.port",
                reason: format!(
                    "RPC and HTTP servers both bind {}",
                    self.rpc_server.address()
                ),
            });
        }
        if self.lifecycle.stop_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "lifecycle.stop_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
