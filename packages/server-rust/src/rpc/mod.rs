//! Binary RPC transport: method router, accept loop, and client.

pub mod client;
pub mod handlers;
pub mod router;
pub mod server;

pub use client::{RpcClient, RpcClientError};
pub use handlers::routes;
pub use router::{RpcCall, RpcRouter};
pub use server::{frame_codec, RpcEngine, MAX_FRAME_LEN};
