//! Minimal client of the RPC transport.

use std::collections::HashMap;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use duplex_core::messages::{
    decode, encode, CodecError, Empty, PingResponse, RpcRequest, RpcResponse, RpcStatus,
    PING_METHOD,
};

use super::server::frame_codec;

#[derive(Debug, thiserror::Error)]
pub enum RpcClientError {
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("server returned {0}")]
    Status(#[from] RpcStatus),

    #[error("connection closed before the response arrived")]
    Closed,

    #[error("response id {actual} does not match request id {expected}")]
    UnexpectedResponse { expected: u64, actual: u64 },
}

/// One connection; calls are sent one at a time.
pub struct RpcClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    next_id: u64,
}

impl RpcClient {
    /// Opens a connection to `addr`.
    ///
    /// # Errors
    ///
    /// [`RpcClientError::Io`] when the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, frame_codec()),
            next_id: 1,
        })
    }

    /// Calls `method` with `request` and decodes its response.
    ///
    /// `metadata` travels with the call; put a `traceparent` there to join
    /// the caller's trace.
    ///
    /// # Errors
    ///
    /// The server's [`RpcStatus`], or a transport or codec failure.
    pub async fn call<Req, Resp>(
        &mut self,
        method: &str,
        request: &Req,
        metadata: HashMap<String, String>,
    ) -> Result<Resp, RpcClientError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let id = self.next_id;
        self.next_id += 1;

        let envelope = RpcRequest {
            id,
            method: method.to_string(),
            metadata,
            payload: encode(request)?,
        };
        self.framed.send(Bytes::from(encode(&envelope)?)).await?;

        let frame = self.framed.next().await.ok_or(RpcClientError::Closed)??;
        let response: RpcResponse = decode(&frame)?;
        if let Some(status) = response.error {
            return Err(status.into());
        }
        if response.id != id {
            return Err(RpcClientError::UnexpectedResponse {
                expected: id,
                actual: response.id,
            });
        }
        Ok(decode(&response.payload)?)
    }

    /// Calls the ping method.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn ping(&mut self) -> Result<String, RpcClientError> {
        self.ping_with_metadata(HashMap::new()).await
    }

    /// Calls the ping method with caller metadata.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::call`].
    pub async fn ping_with_metadata(
        &mut self,
        metadata: HashMap<String, String>,
    ) -> Result<String, RpcClientError> {
        let response: PingResponse = self.call(PING_METHOD, &Empty {}, metadata).await?;
        Ok(response.message)
    }

    /// Sends an arbitrary frame; used to exercise malformed input.
    #[cfg(test)]
    pub(crate) async fn send_raw(&mut self, frame: Vec<u8>) -> Result<RpcResponse, RpcClientError> {
        self.framed.send(Bytes::from(frame)).await?;
        let frame = self.framed.next().await.ok_or(RpcClientError::Closed)??;
        Ok(decode(&frame)?)
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}
