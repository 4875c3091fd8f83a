//! Listening server wrapper shared by both transports.
//!
//! A [`ServerHandle`] owns a bind address, a [`ShutdownController`], and the
//! transport [`Engine`]. Its start hook spawns the bind + serve task and
//! returns immediately; the outcome of the bind is reported through
//! [`ServerHandle::ready`]. Its stop hook drains until the hook's deadline,
//! then cancels outstanding requests and force-closes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use duplex_core::{Component, StopContext};

use super::shutdown::{BindError, ServerState, ShutdownController};

/// Transport-specific accept loop.
#[async_trait]
pub trait Engine: Send + 'static {
    /// Serves connections from `listener` until `controller` signals
    /// shutdown, then returns once its in-flight work has finished.
    async fn serve(
        self: Box<Self>,
        listener: TcpListener,
        controller: Arc<ShutdownController>,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server `{server}` has already been started")]
    AlreadyStarted { server: &'static str },

    #[error("server `{server}` did not drain before its deadline; {in_flight} request(s) cancelled")]
    DrainTimeout { server: &'static str, in_flight: u64 },
}

/// One listening socket and the engine bound to it.
pub struct ServerHandle {
    name: &'static str,
    address: String,
    controller: Arc<ShutdownController>,
    engine: Mutex<Option<Box<dyn Engine>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServerHandle {
    #[must_use]
    pub fn new(
        name: &'static str,
        address: String,
        controller: Arc<ShutdownController>,
        engine: impl Engine,
    ) -> Self {
        Self {
            name,
            address,
            controller,
            engine: Mutex::new(Some(Box::new(engine))),
            task: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn controller(&self) -> &Arc<ShutdownController> {
        &self.controller
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.controller.state()
    }

    /// Waits for the bind outcome of a started server.
    ///
    /// # Errors
    ///
    /// Returns the [`BindError`] if the socket could not be bound.
    pub async fn ready(&self) -> Result<SocketAddr, BindError> {
        self.controller.ready().await
    }

    /// Spawns the bind + serve task. Never waits for the bind.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyStarted`] when the engine was already taken.
    pub fn start(&self) -> Result<(), ServerError> {
        let engine = self
            .engine
            .lock()
            .take()
            .ok_or(ServerError::AlreadyStarted { server: self.name })?;

        let name = self.name;
        let address = self.address.clone();
        let controller = Arc::clone(&self.controller);
        let task = tokio::spawn(async move {
            let listener = match TcpListener::bind(&address).await {
                Ok(listener) => listener,
                Err(err) => {
                    let err = BindError::new(address, &err);
                    error!(server = name, error = %err, "failed to bind");
                    controller.mark_bind_failed(err);
                    return;
                }
            };
            let local = match listener.local_addr() {
                Ok(local) => local,
                Err(err) => {
                    let err = BindError::new(address, &err);
                    error!(server = name, error = %err, "bound socket has no local address");
                    controller.mark_bind_failed(err);
                    return;
                }
            };

            controller.mark_listening(local);
            info!(server = name, address = %local, "listening");

            if let Err(err) = engine.serve(listener, Arc::clone(&controller)).await {
                error!(server = name, error = %format!("{err:#}"), "server terminated with error");
            }
            controller.mark_stopped();
            info!(server = name, "server stopped");
        });

        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Drains and stops the server by `ctx.deadline()`.
    ///
    /// Stopping a server that never started, or that already stopped, is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`ServerError::DrainTimeout`] when requests were still running at the
    /// deadline and had to be cancelled.
    pub async fn stop(&self, ctx: &StopContext) -> Result<(), ServerError> {
        let Some(mut task) = self.task.lock().take() else {
            self.controller.trigger_shutdown();
            self.controller.mark_stopped();
            return Ok(());
        };

        info!(server = self.name, in_flight = self.controller.in_flight_count(), "draining");
        self.controller.trigger_shutdown();

        if tokio::time::timeout_at(ctx.deadline(), &mut task).await.is_ok() {
            self.controller.mark_stopped();
            return Ok(());
        }

        let in_flight = self.controller.in_flight_count();
        warn!(server = self.name, in_flight, "drain deadline passed, force-closing");
        self.controller.cancel_requests();
        task.abort();
        self.controller.mark_stopped();
        Err(ServerError::DrainTimeout {
            server: self.name,
            in_flight,
        })
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Component for ServerHandle {
    async fn start(&self) -> anyhow::Result<()> {
        ServerHandle::start(self)?;
        Ok(())
    }

    async fn stop(&self, ctx: &StopContext) -> anyhow::Result<()> {
        ServerHandle::stop(self, ctx).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use super::*;

    /// Accepts nothing; returns when shutdown is signalled, optionally
    /// pretending an in-flight request never finishes.
    pub(crate) struct IdleEngine {
        pub(crate) stuck: bool,
    }

    #[async_trait]
    impl Engine for IdleEngine {
        async fn serve(
            self: Box<Self>,
            _listener: TcpListener,
            controller: Arc<ShutdownController>,
        ) -> anyhow::Result<()> {
            let _guard = self.stuck.then(|| controller.in_flight_guard());
            controller.wait_for_shutdown().await;
            if self.stuck {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn handle(address: &str, stuck: bool) -> ServerHandle {
        ServerHandle::new(
            "test",
            address.to_string(),
            Arc::new(ShutdownController::new()),
            IdleEngine { stuck },
        )
    }

    fn budget(secs: u64) -> StopContext {
        StopContext::with_budget(Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn start_binds_and_reports_ready() {
        let server = handle("127.0.0.1:0", false);
        server.start().unwrap();

        let addr = server.ready().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(server.state(), ServerState::Listening(addr));

        server.stop(&budget(1)).await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let server = handle("127.0.0.1:0", false);
        server.start().unwrap();

        assert!(matches!(
            server.start(),
            Err(ServerError::AlreadyStarted { server: "test" })
        ));
        server.stop(&budget(1)).await.unwrap();
    }

    #[tokio::test]
    async fn port_in_use_is_a_bind_error() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = occupied.local_addr().unwrap().to_string();

        let server = handle(&address, false);
        server.start().unwrap();

        let err = server.ready().await.unwrap_err();
        assert_eq!(err.kind, std::io::ErrorKind::AddrInUse);
        assert_eq!(err.address, address);
        assert_eq!(server.state(), ServerState::Stopped);

        // The failed task already finished; stop is clean.
        server.stop(&budget(1)).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_address_is_a_bind_error() {
        let server = handle("not an address", false);
        server.start().unwrap();
        assert!(server.ready().await.is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_safe_before_start() {
        let never_started = handle("127.0.0.1:0", false);
        never_started.stop(&budget(1)).await.unwrap();
        assert_eq!(never_started.state(), ServerState::Stopped);

        let server = handle("127.0.0.1:0", false);
        server.start().unwrap();
        server.ready().await.unwrap();
        server.stop(&budget(1)).await.unwrap();
        server.stop(&budget(1)).await.unwrap();
    }

    #[tokio::test]
    async fn drain_overrun_cancels_and_force_closes() {
        let server = handle("127.0.0.1:0", true);
        let token = server.controller().request_token();
        server.start().unwrap();
        server.ready().await.unwrap();

        let ctx = StopContext::with_budget(Duration::from_millis(50));
        let err = server.stop(&ctx).await.unwrap_err();

        assert!(matches!(
            err,
            ServerError::DrainTimeout {
                server: "test",
                in_flight: 1
            }
        ));
        assert!(token.is_cancelled());
        assert_eq!(server.state(), ServerState::Stopped);
    }
}
