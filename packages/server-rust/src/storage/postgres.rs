//! Postgres connection pool lifecycle: connect with a bounded liveness check,
//! publish the pool to collaborators, close on stop.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{info, warn};

use duplex_core::{Component, StopContext};

use crate::config::{ConfigError, DatabaseConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database pool is not connected")]
    NotConnected,

    #[error("database pool is already connected")]
    AlreadyConnected,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("liveness probe against {host} failed: {source}")]
    Probe {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("liveness probe against {host} timed out after {timeout:?}")]
    ProbeTimeout { host: String, timeout: Duration },
}

// ---------------------------------------------------------------------------
// PoolHandle
// ---------------------------------------------------------------------------

/// Shared slot through which the probed pool is published.
#[derive(Clone, Default)]
pub struct PoolHandle {
    slot: Arc<ArcSwapOption<PgPool>>,
}

impl PoolHandle {
    /// Returns the live pool.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotConnected`] before a successful connect or after close.
    pub fn get(&self) -> Result<PgPool, StorageError> {
        self.slot
            .load_full()
            .map(|pool| PgPool::clone(&pool))
            .ok_or(StorageError::NotConnected)
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.slot.load().is_some()
    }

    fn publish(&self, pool: PgPool) {
        self.slot.store(Some(Arc::new(pool)));
    }

    fn take(&self) -> Option<Arc<PgPool>> {
        self.slot.swap(None)
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Opens, probes, and closes the connection pool.
#[derive(Debug)]
pub struct Storage {
    config: DatabaseConfig,
    pool: PoolHandle,
}

impl Storage {
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pool: PoolHandle::default(),
        }
    }

    /// Handle for data-access collaborators; valid before and after connect.
    #[must_use]
    pub fn pool(&self) -> PoolHandle {
        self.pool.clone()
    }

    fn connect_options(&self) -> Result<PgConnectOptions, StorageError> {
        Ok(PgConnectOptions::new()
            .host(&self.config.host)
            .port(self.config.port)
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.db_name)
            .ssl_mode(self.config.ssl_mode()?))
    }

    /// Builds the pool and runs one liveness probe bounded by the probe timeout.
    ///
    /// The pool is only published once the probe succeeded; on failure it is
    /// closed and dropped.
    ///
    /// # Errors
    ///
    /// [`StorageError::Probe`] or [`StorageError::ProbeTimeout`] when the
    /// database cannot be reached in time, [`StorageError::AlreadyConnected`]
    /// on a second call.
    pub async fn connect(&self) -> Result<(), StorageError> {
        if self.pool.is_connected() {
            return Err(StorageError::AlreadyConnected);
        }

        let timeout = self.config.probe_timeout();
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_conns)
            .min_connections(self.config.min_conns)
            .acquire_timeout(timeout)
            .connect_lazy_with(self.connect_options()?);

        let probe = sqlx::query("SELECT 1").execute(&pool);
        let failure = match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(_)) => None,
            Ok(Err(source)) => Some(StorageError::Probe {
                host: self.config.host.clone(),
                source,
            }),
            Err(_) => Some(StorageError::ProbeTimeout {
                host: self.config.host.clone(),
                timeout,
            }),
        };

        if let Some(err) = failure {
            pool.close().await;
            warn!(host = %self.config.host, error = %err, "database liveness probe failed");
            return Err(err);
        }

        self.pool.publish(pool);
        info!(
            host = %self.config.host,
            port = self.config.port,
            max_conns = self.config.max_conns,
            min_conns = self.config.min_conns,
            "database pool connected"
        );
        Ok(())
    }

    /// Closes the pool. Later calls find nothing to close.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.take() {
            pool.close().await;
            info!(host = %self.config.host, "database pool closed");
        }
    }
}

#[async_trait]
impl Component for Storage {
    async fn start(&self) -> anyhow::Result<()> {
        self.connect().await?;
        Ok(())
    }

    async fn stop(&self, _ctx: &StopContext) -> anyhow::Result<()> {
        self.close().await;
        Ok(())
    }
}
