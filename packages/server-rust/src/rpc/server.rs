//! Length-prefixed `MsgPack` transport.
//!
//! Every frame is a 4-byte big-endian length followed by one envelope. A
//! connection handles its requests one at a time; after shutdown is
//! signalled it finishes the request it is processing and closes.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use duplex_core::messages::{decode, encode, RpcRequest, RpcResponse, RpcStatus};
use duplex_core::CallInfo;

use super::router::{RpcCall, RpcRouter};
use crate::network::{Engine, ShutdownController};
use crate::observability::ServerInterceptor;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Frame codec shared by the server and [`super::RpcClient`].
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

/// Accept loop of the RPC server.
pub struct RpcEngine {
    router: Arc<RpcRouter>,
    interceptor: Arc<ServerInterceptor>,
}

impl RpcEngine {
    #[must_use]
    pub fn new(router: RpcRouter, interceptor: Arc<ServerInterceptor>) -> Self {
        Self {
            router: Arc::new(router),
            interceptor,
        }
    }
}

#[async_trait]
impl Engine for RpcEngine {
    async fn serve(
        self: Box<Self>,
        listener: TcpListener,
        controller: Arc<ShutdownController>,
    ) -> anyhow::Result<()> {
        let connections = TaskTracker::new();

        loop {
            tokio::select! {
                () = controller.wait_for_shutdown() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let connection = Connection {
                            router: Arc::clone(&self.router),
                            interceptor: Arc::clone(&self.interceptor),
                            controller: Arc::clone(&controller),
                            peer,
                        };
                        connections.spawn(connection.run(stream));
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                },
            }
        }

        drop(listener);
        connections.close();
        debug!(open = connections.len(), "waiting for connections to finish");
        connections.wait().await;
        Ok(())
    }
}

struct Connection {
    router: Arc<RpcRouter>,
    interceptor: Arc<ServerInterceptor>,
    controller: Arc<ShutdownController>,
    peer: SocketAddr,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        debug!(peer = %self.peer, "connection opened");
        let mut framed = Framed::new(stream, frame_codec());

        loop {
            let frame = tokio::select! {
                () = self.controller.wait_for_shutdown() => break,
                frame = framed.next() => frame,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    warn!(peer = %self.peer, error = %err, "unreadable frame, closing connection");
                    break;
                }
                None => break,
            };

            let response = self.handle(&frame).await;
            let bytes = match encode(&response) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(peer = %self.peer, id = response.id, error = %err, "failed to encode response");
                    break;
                }
            };
            if let Err(err) = framed.send(Bytes::from(bytes)).await {
                debug!(peer = %self.peer, error = %err, "peer went away before the response");
                break;
            }
        }

        debug!(peer = %self.peer, "connection closed");
    }

    async fn handle(&self, frame: &[u8]) -> RpcResponse {
        let request: RpcRequest = match decode(frame) {
            Ok(request) => request,
            Err(err) => {
                warn!(peer = %self.peer, error = %err, "malformed request envelope");
                return RpcResponse::failed(0, RpcStatus::invalid_argument(err.to_string()));
            }
        };

        let _in_flight = self.controller.in_flight_guard();
        let parent = self.interceptor.extract_parent(&request.metadata);
        let RpcRequest {
            id,
            method,
            payload,
            ..
        } = request;
        let call = CallInfo::new(method.clone()).with_cancellation(self.controller.request_token());

        let router = &self.router;
        let result = self
            .interceptor
            .intercept(call, parent, |ctx| {
                router.dispatch(RpcCall {
                    ctx,
                    method,
                    payload,
                })
            })
            .await;

        match result {
            Ok(payload) => RpcResponse::ok(id, payload),
            Err(status) => RpcResponse::failed(id, status),
        }
    }
}
