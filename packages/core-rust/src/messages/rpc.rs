//! Request/response envelopes of the binary RPC transport.
//!
//! Each frame on the wire holds one envelope serialized as named `MsgPack`
//! (`rmp_serde::to_vec_named()`) with camelCase field names. The method
//! payload inside the envelope is itself a named `MsgPack` message.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::context::Cancelled;

/// Fully qualified name of the ping method.
pub const PING_METHOD: &str = "/duplex.PingService/Ping";

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// One call from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    /// Correlates the response; chosen by the client.
    pub id: u64,
    pub method: String,
    /// Call metadata, including the W3C `traceparent` when the caller is traced.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// The server's answer to the request with the same `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    pub id: u64,
    #[serde(with = "serde_bytes", default)]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcStatus>,
}

impl RpcResponse {
    #[must_use]
    pub fn ok(id: u64, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(id: u64, status: RpcStatus) -> Self {
        Self {
            id,
            payload: Vec::new(),
            error: Some(status),
        }
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Failure category of an RPC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    Cancelled,
    InvalidArgument,
    Unimplemented,
    Internal,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "cancelled",
            Self::InvalidArgument => "invalid_argument",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
        })
    }
}

/// Error returned by an RPC method, carried in [`RpcResponse::error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcStatus {
    pub code: StatusCode,
    pub message: String,
}

impl RpcStatus {
    #[must_use]
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    #[must_use]
    pub fn unimplemented(method: &str) -> Self {
        Self::new(StatusCode::Unimplemented, format!("unknown method {method}"))
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }
}

impl From<Cancelled> for RpcStatus {
    fn from(cancelled: Cancelled) -> Self {
        Self::new(StatusCode::Cancelled, cancelled.to_string())
    }
}

// ---------------------------------------------------------------------------
// Method messages
// ---------------------------------------------------------------------------

/// Request message of methods that take no arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Response of the ping method, shared with the HTTP gateway's JSON body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Codec helpers
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Serializes `value` as named `MsgPack`.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if `value` cannot be represented.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Deserializes a named `MsgPack` message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed or mismatched input.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_roundtrip() {
        let request = RpcRequest {
            id: 7,
            method: PING_METHOD.to_string(),
            metadata: HashMap::from([(
                "traceparent".to_string(),
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
            )]),
            payload: encode(&Empty {}).unwrap(),
        };

        let bytes = encode(&request).unwrap();
        let decoded: RpcRequest = decode(&bytes).unwrap();

        assert_eq!(decoded, request);
        let _: Empty = decode(&decoded.payload).unwrap();
    }

    #[test]
    fn request_without_metadata_decodes() {
        #[derive(Serialize)]
        struct Bare<'a> {
            id: u64,
            method: &'a str,
            #[serde(with = "serde_bytes")]
            payload: &'a [u8],
        }

        let bytes = rmp_serde::to_vec_named(&Bare {
            id: 1,
            method: PING_METHOD,
            payload: &[],
        })
        .unwrap();
        let decoded: RpcRequest = decode(&bytes).unwrap();

        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn failed_response_carries_status() {
        let response = RpcResponse::failed(3, RpcStatus::unimplemented("/nope"));
        let decoded: RpcResponse = decode(&encode(&response).unwrap()).unwrap();

        let status = decoded.error.unwrap();
        assert_eq!(status.code, StatusCode::Unimplemented);
        assert_eq!(status.to_string(), "unimplemented: unknown method /nope");
    }

    #[test]
    fn cancelled_maps_to_cancelled_status() {
        let status = RpcStatus::from(Cancelled);
        assert_eq!(status.code, StatusCode::Cancelled);
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let bytes = encode(&PingResponse {
            message: "pong".to_string(),
        })
        .unwrap();
        assert!(matches!(
            decode::<RpcRequest>(&bytes),
            Err(CodecError::Decode(_))
        ));
    }
}
