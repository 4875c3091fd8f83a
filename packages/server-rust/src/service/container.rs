//! Wiring of services shared by the RPC and HTTP transports.

use std::sync::Arc;

use duplex_core::Logger;

use super::ping::{PingService, PingStore};

/// Aggregates the business services both transports call into.
pub struct ServiceContainer {
    ping: PingService,
}

impl ServiceContainer {
    #[must_use]
    pub fn new(logger: &Logger, store: Arc<dyn PingStore>) -> Self {
        tracing::debug!(parent: logger.span(), "service container assembled");
        Self {
            ping: PingService::new(store),
        }
    }

    #[must_use]
    pub fn ping(&self) -> &PingService {
        &self.ping
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer").finish_non_exhaustive()
    }
}
