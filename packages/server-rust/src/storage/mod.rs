//! `PostgreSQL` connectivity.
//!
//! [`Storage`] owns the connection pool's lifecycle: connect with a bounded
//! liveness probe at boot, close once at shutdown. Data-access code reaches
//! the pool only through a [`PoolHandle`], which refuses access until the
//! probe has succeeded.

pub mod ping_store;
pub mod postgres;

pub use ping_store::PgPingStore;
pub use postgres::{PoolHandle, Storage, StorageError};
