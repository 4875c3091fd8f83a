//! Business services, reached identically from the RPC and HTTP transports.

pub mod container;
pub mod ping;

pub use container::ServiceContainer;
pub use ping::{PingService, PingStore};
