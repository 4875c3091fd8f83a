//! Ping business logic and the storage seam it reads through.

use std::sync::Arc;

use async_trait::async_trait;

use duplex_core::RequestContext;

/// Narrow capability the ping service needs from the data layer.
#[async_trait]
pub trait PingStore: Send + Sync {
    /// Produces the response string.
    async fn pong(&self) -> anyhow::Result<String>;
}

/// Business facade behind both transports.
pub struct PingService {
    store: Arc<dyn PingStore>,
}

impl PingService {
    #[must_use]
    pub fn new(store: Arc<dyn PingStore>) -> Self {
        Self { store }
    }

    /// Answers a ping. Store failures are returned unchanged.
    ///
    /// # Errors
    ///
    /// Whatever the underlying [`PingStore`] reports.
    pub async fn ping(&self, ctx: &RequestContext) -> anyhow::Result<String> {
        tracing::debug!(parent: ctx.logger().span(), "answering ping");
        self.store.pong().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// In-memory store: a fixed answer or a fixed failure.
    pub(crate) struct StaticStore(pub(crate) Result<&'static str, &'static str>);

    #[async_trait]
    impl PingStore for StaticStore {
        async fn pong(&self) -> anyhow::Result<String> {
            self.0
                .map(str::to_string)
                .map_err(|message| anyhow::anyhow!(message))
        }
    }

    #[tokio::test]
    async fn ping_returns_store_answer() {
        let service = PingService::new(Arc::new(StaticStore(Ok("pong"))));
        let message = service
            .ping(&RequestContext::detached("/test"))
            .await
            .unwrap();
        assert_eq!(message, "pong");
    }

    #[tokio::test]
    async fn ping_passes_store_failure_through() {
        let service = PingService::new(Arc::new(StaticStore(Err("connection reset"))));
        let err = service
            .ping(&RequestContext::detached("/test"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }
}
