//! Wire messages of the RPC transport.

pub mod rpc;

pub use rpc::{
    decode, encode, CodecError, Empty, PingResponse, RpcRequest, RpcResponse, RpcStatus,
    StatusCode, PING_METHOD,
};
