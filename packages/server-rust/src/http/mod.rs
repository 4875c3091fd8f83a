//! HTTP gateway: axum router, interceptor glue, and the serving engine.

pub mod error;
pub mod handlers;
pub mod middleware;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

pub use error::{ApiError, HandlerFailure};
pub use middleware::{InterceptState, RequestScope, TRACE_ID_HEADER};

use crate::config::HttpServerConfig;
use crate::network::{Engine, Readiness, ShutdownController};
use crate::service::ServiceContainer;

/// Shared state of the HTTP routes.
#[derive(Clone)]
pub struct HttpState {
    pub services: Arc<ServiceContainer>,
    pub readiness: Readiness,
    pub start_time: Instant,
}

/// Assembles the router.
///
/// Only the `/api` group runs through the interceptor; health probes stay
/// out of request logging.
pub fn build_router(
    state: HttpState,
    config: &HttpServerConfig,
    intercept: InterceptState,
) -> Router {
    let api = Router::new()
        .route("/ping", get(handlers::ping_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            intercept,
            middleware::intercept_request,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::liveness_handler))
        .route("/health/ready", get(handlers::readiness_handler))
        .layer(middleware::build_http_layers(config))
        .with_state(state)
}

/// Serves a router until the controller signals shutdown.
pub struct HttpEngine {
    router: Router,
}

impl HttpEngine {
    #[must_use]
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Engine for HttpEngine {
    async fn serve(
        self: Box<Self>,
        listener: TcpListener,
        controller: Arc<ShutdownController>,
    ) -> anyhow::Result<()> {
        let shutdown = async move { controller.wait_for_shutdown().await };
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}
