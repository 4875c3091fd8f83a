//! Postgres-backed [`PingStore`](crate::service::PingStore).

use async_trait::async_trait;

use super::postgres::PoolHandle;
use crate::service::PingStore;

/// [`PingStore`] answered by the database, so a ping exercises the pool.
#[derive(Debug, Clone)]
pub struct PgPingStore {
    pool: PoolHandle,
}

impl PgPingStore {
    #[must_use]
    pub fn new(pool: PoolHandle) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PingStore for PgPingStore {
    async fn pong(&self) -> anyhow::Result<String> {
        let pool = self.pool.get()?;
        let (message,): (String,) = sqlx::query_as("SELECT $1::text")
            .bind("pong")
            .fetch_one(&pool)
            .await?;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[tokio::test]
    async fn pong_before_connect_reports_not_connected() {
        let store = PgPingStore::new(PoolHandle::default());
        let err = store.pong().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StorageError>(),
            Some(StorageError::NotConnected)
        ));
    }
}
