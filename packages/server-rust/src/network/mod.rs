//! Listening-socket lifecycle shared by the RPC and HTTP transports.

pub mod server;
pub mod shutdown;

use std::sync::Arc;

pub use server::{Engine, ServerError, ServerHandle};
pub use shutdown::{BindError, InFlightGuard, ServerState, ShutdownController};

/// Process readiness: every registered server is listening.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    servers: Vec<(&'static str, Arc<ShutdownController>)>,
}

impl Readiness {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &'static str, controller: Arc<ShutdownController>) -> Self {
        self.servers.push((name, controller));
        self
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        !self.servers.is_empty()
            && self
                .servers
                .iter()
                .all(|(_, c)| matches!(c.state(), ServerState::Listening(_)))
    }

    #[must_use]
    pub fn states(&self) -> Vec<(&'static str, ServerState)> {
        self.servers.iter().map(|(name, c)| (*name, c.state())).collect()
    }

    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.servers.iter().map(|(_, c)| c.in_flight_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_only_when_every_server_listens() {
        let rpc = Arc::new(ShutdownController::new());
        let http = Arc::new(ShutdownController::new());
        let readiness = Readiness::new()
            .with("rpc", Arc::clone(&rpc))
            .with("http", Arc::clone(&http));

        assert!(!readiness.is_ready());

        http.mark_listening("127.0.0.1:8080".parse().unwrap());
        assert!(!readiness.is_ready());

        rpc.mark_listening("127.0.0.1:9090".parse().unwrap());
        assert!(readiness.is_ready());

        rpc.trigger_shutdown();
        assert!(!readiness.is_ready());
        assert_eq!(readiness.states()[0], ("rpc", ServerState::Draining));
    }

    #[test]
    fn empty_readiness_is_not_ready() {
        assert!(!Readiness::new().is_ready());
    }
}
