//! Duplex core: component lifecycle graph, request context, interceptor, and RPC wire messages.

pub mod context;
pub mod interceptor;
pub mod lifecycle;
pub mod logger;
pub mod messages;

pub use context::{Cancelled, RequestContext};
pub use interceptor::{CallInfo, Interceptor, Outcome};
pub use lifecycle::{
    Component, ComponentDescriptor, ComponentGraph, GraphState, ResolveError, ShutdownError,
    StartError, StopContext,
};
pub use logger::Logger;
