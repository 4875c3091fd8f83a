//! Method routing: dispatches decoded RPC calls to unary handlers by their
//! fully qualified method name.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tower::Service;

use duplex_core::messages::{decode, encode, RpcStatus};
use duplex_core::RequestContext;

type BoxedFuture = Pin<Box<dyn Future<Output = Result<Vec<u8>, RpcStatus>> + Send>>;

/// A type-erased unary handler: raw payload in, raw payload out.
type BoxedHandler = Arc<dyn Fn(RequestContext, Vec<u8>) -> BoxedFuture + Send + Sync>;

/// One call as seen by the router, after the interceptor built its context.
#[derive(Debug)]
pub struct RpcCall {
    pub ctx: RequestContext,
    pub method: String,
    pub payload: Vec<u8>,
}

/// Routes [`RpcCall`] values to the handler registered for their method.
///
/// Calls to an unregistered method resolve to `Unimplemented`.
#[derive(Clone, Default)]
pub struct RpcRouter {
    handlers: HashMap<&'static str, BoxedHandler>,
}

impl RpcRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unary method.
    ///
    /// The payload is decoded into `Req` before `handler` runs; a payload
    /// that does not decode answers `InvalidArgument` without calling it.
    pub fn register_unary<Req, Resp, F, Fut>(&mut self, method: &'static str, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(RequestContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, RpcStatus>> + Send + 'static,
    {
        let erased = move |ctx: RequestContext, payload: Vec<u8>| -> BoxedFuture {
            let request = match decode::<Req>(&payload) {
                Ok(request) => request,
                Err(err) => {
                    return Box::pin(std::future::ready(Err(RpcStatus::invalid_argument(
                        err.to_string(),
                    ))));
                }
            };
            let response = handler(ctx, request);
            Box::pin(async move {
                let response = response.await?;
                encode(&response).map_err(|err| RpcStatus::internal(err.to_string()))
            })
        };
        self.handlers.insert(method, Arc::new(erased));
    }

    #[must_use]
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.handlers.keys().copied().collect();
        methods.sort_unstable();
        methods
    }

    /// Runs the handler for `call.method`.
    pub fn dispatch(&self, call: RpcCall) -> BoxedFuture {
        let RpcCall {
            ctx,
            method,
            payload,
        } = call;
        match self.handlers.get(method.as_str()) {
            Some(handler) => handler(ctx, payload),
            None => Box::pin(std::future::ready(Err(RpcStatus::unimplemented(&method)))),
        }
    }
}

impl std::fmt::Debug for RpcRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcRouter")
            .field("methods", &self.methods())
            .finish()
    }
}

impl Service<RpcCall> for RpcRouter {
    type Response = Vec<u8>;
    type Error = RpcStatus;
    type Future = BoxedFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: RpcCall) -> Self::Future {
        self.dispatch(call)
    }
}
