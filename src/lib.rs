//! Client side TCP connection pool for a single peer.
//!
//! Connections are created lazily, probed for liveness before reuse and
//! evicted once they idle too long while the pool is over its target size.
//! Unix only: sockets are probed with `poll(2)`.
mod error;
pub use error::{ConnectError, Error, PoolError, Result};

pub mod connectors;
mod peer;
pub mod pool;

pub use peer::Peer;
pub use pool::{Connection, ConnectionPool, PoolConfig, Pooled};
