//! Typed composition of the process.
//!
//! Every component is constructed here, in one ordered sequence, and then
//! registered with the lifecycle graph, which only decides when hooks run:
//!
//! ```text
//! config ─┬─ tracer ──────────────┐
//!         ├─ storage ── services ─┼─ rpc_server
//! logger ─┴────────── interceptor ┴─ http_server
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use duplex_core::{Component, ComponentDescriptor, ComponentGraph, Logger, ShutdownError};

use super::error::BootError;
use crate::config::Config;
use crate::http::{build_router, HttpEngine, HttpState, InterceptState};
use crate::network::{BindError, Readiness, ServerHandle, ShutdownController};
use crate::observability::{ServerInterceptor, Telemetry};
use crate::rpc::{routes, RpcEngine};
use crate::service::{PingStore, ServiceContainer};
use crate::storage::{PgPingStore, Storage};

/// Already-constructed collaborators that [`App::from_parts`] wires together.
///
/// [`App::build`] fills it from configuration; tests substitute the storage
/// component and the data store.
pub struct AppParts {
    pub config: Config,
    pub logger: Logger,
    pub telemetry: Arc<Telemetry>,
    pub storage: Arc<dyn Component>,
    pub store: Arc<dyn PingStore>,
}

/// The composed process: lifecycle graph plus handles to both servers.
pub struct App {
    config: Config,
    logger: Logger,
    graph: ComponentGraph,
    rpc: Arc<ServerHandle>,
    http: Arc<ServerHandle>,
    readiness: Readiness,
}

impl App {
    /// Builds the production composition: `PostgreSQL` storage behind the
    /// ping store.
    ///
    /// # Errors
    ///
    /// [`BootError::Config`] when the configuration does not validate, or
    /// [`BootError::Resolve`] when the graph cannot be resolved.
    pub fn build(config: Config, logger: Logger) -> Result<Self, BootError> {
        config.validate()?;

        let telemetry = Arc::new(Telemetry::new(&config.tracing));
        let storage = Arc::new(Storage::new(config.database.clone()));
        let store = Arc::new(PgPingStore::new(storage.pool()));

        Self::from_parts(AppParts {
            config,
            logger,
            telemetry,
            storage,
            store,
        })
    }

    /// Wires `parts` into servers and registers everything with the graph.
    ///
    /// # Errors
    ///
    /// [`BootError::Resolve`] when the graph cannot be resolved.
    pub fn from_parts(parts: AppParts) -> Result<Self, BootError> {
        let AppParts {
            config,
            logger,
            telemetry,
            storage,
            store,
        } = parts;

        let services = Arc::new(ServiceContainer::new(&logger, store));
        let interceptor = Arc::new(ServerInterceptor::new(
            logger.clone(),
            telemetry.tracer(),
            telemetry.propagator(),
        ));

        let rpc_controller = Arc::new(ShutdownController::new());
        let http_controller = Arc::new(ShutdownController::new());
        let readiness = Readiness::new()
            .with("rpc", Arc::clone(&rpc_controller))
            .with("http", Arc::clone(&http_controller));

        let rpc = Arc::new(ServerHandle::new(
            "rpc",
            config.rpc_server.address(),
            rpc_controller,
            RpcEngine::new(routes(Arc::clone(&services)), Arc::clone(&interceptor)),
        ));

        let router = build_router(
            HttpState {
                services,
                readiness: readiness.clone(),
                start_time: Instant::now(),
            },
            &config.http_server,
            InterceptState {
                interceptor,
                controller: Arc::clone(&http_controller),
            },
        );
        let http = Arc::new(ServerHandle::new(
            "http",
            config.http_server.address(),
            http_controller,
            HttpEngine::new(router),
        ));

        let graph = ComponentGraph::resolve(vec![
            ComponentDescriptor::passive("config"),
            ComponentDescriptor::passive("logger"),
            ComponentDescriptor::new("tracer", telemetry).depends_on(["config"]),
            ComponentDescriptor::new("storage", storage).depends_on(["config"]),
            ComponentDescriptor::passive("services").depends_on(["storage", "logger"]),
            ComponentDescriptor::passive("interceptor").depends_on(["logger", "tracer"]),
            ComponentDescriptor::new("rpc_server", Arc::clone(&rpc) as Arc<dyn Component>)
                .depends_on(["config", "interceptor", "services"]),
            ComponentDescriptor::new("http_server", Arc::clone(&http) as Arc<dyn Component>)
                .depends_on(["config", "interceptor", "services"]),
        ])?;

        Ok(Self {
            config,
            logger,
            graph,
            rpc,
            http,
            readiness,
        })
    }

    #[must_use]
    pub fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    #[must_use]
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    #[must_use]
    pub fn rpc_server(&self) -> &ServerHandle {
        &self.rpc
    }

    #[must_use]
    pub fn http_server(&self) -> &ServerHandle {
        &self.http
    }

    /// Runs every start hook. Servers are only spawned here; use
    /// [`App::wait_ready`] for their bind outcome.
    ///
    /// # Errors
    ///
    /// [`BootError::Start`] when a hook failed; started components have been
    /// rolled back.
    pub async fn start(&self) -> Result<(), BootError> {
        info!(
            parent: self.logger.span(),
            order = ?self.graph.start_order(),
            "starting components"
        );
        self.graph.start().await?;
        Ok(())
    }

    /// Waits up to the configured ready timeout for both servers to report
    /// their bind outcome. Returns whether both are listening.
    pub async fn wait_ready(&self) -> bool {
        let reports = tokio::time::timeout(self.config.lifecycle.ready_timeout(), async {
            tokio::join!(self.rpc.ready(), self.http.ready())
        })
        .await;

        let Ok((rpc, http)) = reports else {
            warn!(
                parent: self.logger.span(),
                timeout = ?self.config.lifecycle.ready_timeout(),
                "servers did not report readiness in time"
            );
            return false;
        };

        let rpc_ok = self.report_bind("rpc", &rpc);
        let http_ok = self.report_bind("http", &http);
        if rpc_ok && http_ok {
            info!(parent: self.logger.span(), "application ready");
        } else {
            error!(parent: self.logger.span(), "application not ready");
        }
        rpc_ok && http_ok
    }

    fn report_bind(&self, server: &'static str, outcome: &Result<SocketAddr, BindError>) -> bool {
        match outcome {
            Ok(address) => {
                info!(parent: self.logger.span(), server, address = %address, "server ready");
                true
            }
            Err(err) => {
                error!(parent: self.logger.span(), server, error = %err, "server failed to bind");
                false
            }
        }
    }

    /// Stops every started component in reverse order.
    pub async fn stop(&self) -> Vec<ShutdownError> {
        let errors = self.graph.stop(self.config.lifecycle.stop_timeout()).await;
        for err in &errors {
            error!(parent: self.logger.span(), error = %err, "shutdown error");
        }
        info!(parent: self.logger.span(), failures = errors.len(), "shutdown complete");
        errors
    }

    /// Starts, serves until `shutdown` resolves, then stops.
    ///
    /// `shutdown` is polled from the beginning, so a termination request that
    /// arrives while booting is honoured: start hooks finish, readiness is
    /// not awaited, and the graph stops right away.
    ///
    /// # Errors
    ///
    /// [`BootError::Start`] when startup failed; nothing is left running.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<ExitCode, BootError> {
        tokio::pin!(shutdown);
        let start = self.start();
        tokio::pin!(start);

        let mut signalled = tokio::select! {
            result = &mut start => {
                result?;
                false
            }
            () = &mut shutdown => true,
        };
        if signalled {
            info!(parent: self.logger.span(), "termination requested during startup");
            // The graph cannot stop while its start is half done.
            start.await?;
        } else {
            signalled = tokio::select! {
                _ = self.wait_ready() => false,
                () = &mut shutdown => true,
            };
        }

        if !signalled {
            shutdown.await;
        }
        info!(parent: self.logger.span(), "shutting down");

        if self.stop().await.is_empty() {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::FAILURE)
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("state", &self.graph.state())
            .field("rpc", &self.rpc)
            .field("http", &self.http)
            .finish_non_exhaustive()
    }
}
