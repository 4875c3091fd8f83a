//! RPC method handlers: decode the request, call the service, map errors to statuses.

use std::sync::Arc;

use duplex_core::messages::{Empty, PingResponse, RpcStatus, PING_METHOD};
use duplex_core::RequestContext;

use super::router::RpcRouter;
use crate::service::ServiceContainer;

/// Registers every RPC method the server exposes.
#[must_use]
pub fn routes(services: Arc<ServiceContainer>) -> RpcRouter {
    let mut router = RpcRouter::new();
    router.register_unary(PING_METHOD, move |ctx: RequestContext, _: Empty| {
        let services = Arc::clone(&services);
        async move {
            let message = services
                .ping()
                .ping(&ctx)
                .await
                .map_err(|err| RpcStatus::internal(format!("{err:#}")))?;
            Ok::<_, RpcStatus>(PingResponse { message })
        }
    });
    router
}
