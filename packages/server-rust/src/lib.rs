//! Duplex server: one ping service exposed over a binary RPC transport and an
//! HTTP/JSON gateway, composed through the lifecycle graph.

pub mod app;
pub mod config;
pub mod http;
pub mod network;
pub mod observability;
pub mod rpc;
pub mod service;
pub mod storage;

pub use app::{App, AppParts, BootError};
pub use config::Config;
