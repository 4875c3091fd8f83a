//! Component lifecycle: a dependency graph of components started in
//! dependency order and stopped in reverse with bounded time per component.

mod component;
mod error;
mod graph;
mod orchestrator;

pub use component::{Component, ComponentDescriptor, StopContext};
pub use error::{ResolveError, ShutdownError, StartError};
pub use graph::{ComponentGraph, GraphState, DEFAULT_ROLLBACK_TIMEOUT};
