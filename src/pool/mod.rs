//! Provides connection pooling to a single peer.
//!
//! This module includes the [`ConnectionPool`] for managing connections,
//! [`Connection`] for the pooled sockets themselves, and [`Pooled`], a guard
//! that hands a connection back to its pool when dropped.
mod connection;
mod pooled;

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

pub use connection::Connection;
use parking_lot::Mutex;
pub use pooled::Pooled;
use serde::{Deserialize, Serialize};

use crate::{error::Result, Peer};

pub(crate) const DEFAULT_POOL_SIZE: usize = 3;
pub(crate) const DEFAULT_KEEPALIVE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPoolConfig", into = "RawPoolConfig")]
pub struct PoolConfig {
    pool_size: usize,
    keepalive_timeout: Duration,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct RawPoolConfig {
    #[serde(default)]
    pool_size: usize,
    #[serde(default = "default_keepalive_timeout_secs")]
    keepalive_timeout_secs: u64,
}

fn default_keepalive_timeout_secs() -> u64 {
    DEFAULT_KEEPALIVE_TIMEOUT_SECS
}

impl From<RawPoolConfig> for PoolConfig {
    fn from(raw: RawPoolConfig) -> Self {
        Self::new(Duration::from_secs(raw.keepalive_timeout_secs)).pool_size(raw.pool_size)
    }
}

impl From<PoolConfig> for RawPoolConfig {
    fn from(config: PoolConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            keepalive_timeout_secs: config.keepalive_timeout.as_secs(),
        }
    }
}

impl PoolConfig {
    /// `keepalive_timeout` is how long a connection may sit idle before it
    /// can be evicted, which only happens while the pool holds more
    /// connections than `pool_size`.
    pub fn new(keepalive_timeout: Duration) -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            keepalive_timeout,
        }
    }

    /// Target pool size, 0 means the default of 3.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = match pool_size {
            0 => DEFAULT_POOL_SIZE,
            n => n,
        };
        self
    }

    pub fn keepalive_timeout(mut self, keepalive_timeout: Duration) -> Self {
        self.keepalive_timeout = keepalive_timeout;
        self
    }
}

#[derive(Debug)]
pub(crate) struct PoolInner {
    // front is the connection released longest ago
    idle_conns: VecDeque<Connection>,
    // connections created and not yet destroyed, idle or checked out
    real_size: usize,
}

impl PoolInner {
    /// Take out at most one connection idle past `keepalive_timeout`, scanning
    /// from the oldest release. Nothing is evicted unless the pool is over
    /// `pool_size`.
    fn evict_expired(
        &mut self,
        pool_size: usize,
        keepalive_timeout: Duration,
        now: Instant,
    ) -> Option<Connection> {
        if self.real_size <= pool_size || self.idle_conns.is_empty() {
            return None;
        }
        let pos = self
            .idle_conns
            .iter()
            .position(|conn| conn.idle_for(now).is_some_and(|idle| idle > keepalive_timeout))?;
        let conn = self.idle_conns.remove(pos)?;
        self.real_size = self.real_size.saturating_sub(1);
        Some(conn)
    }
}

#[cfg(feature = "logging")]
impl Drop for PoolInner {
    fn drop(&mut self) {
        tracing::debug!(
            "pool dropped, closing {} idle connections",
            self.idle_conns.len()
        );
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    peer: Arc<Peer>,
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl Shared {
    fn fetch(&self) -> Result<Connection> {
        let mut inner = self.inner.lock();
        if let Some(conn) = inner.idle_conns.pop_front() {
            return Ok(conn);
        }

        // Room for every live connection to come back, so release never
        // allocates.
        let live = inner.real_size.saturating_add(1);
        inner.idle_conns.try_reserve(live)?;
        inner.real_size = live;
        drop(inner);

        #[cfg(feature = "logging")]
        tracing::debug!("created connection #{} to {}", live, self.peer);

        Ok(Connection::new(self.peer.clone()))
    }

    pub(crate) fn release(&self, conn: Connection) -> bool {
        if !conn.belongs_to(&self.peer) {
            #[cfg(feature = "logging")]
            tracing::warn!(
                "refused connection to {} released into pool for {}",
                conn.peer(),
                self.peer
            );
            return false;
        }

        let evicted = {
            let mut inner = self.inner.lock();
            let evicted = inner.evict_expired(
                self.config.pool_size,
                self.config.keepalive_timeout,
                Instant::now(),
            );
            inner.idle_conns.push_back(conn);
            evicted
        };

        // closed outside the lock
        if let Some(_conn) = evicted {
            #[cfg(feature = "logging")]
            tracing::info!(
                "evicted connection to {} idle past {:?}, reused {} times",
                self.peer,
                self.config.keepalive_timeout,
                _conn.reuse_count()
            );
        }
        true
    }

    pub(crate) fn discard(&self, conn: Connection) {
        {
            let mut inner = self.inner.lock();
            inner.real_size = inner.real_size.saturating_sub(1);
        }
        #[cfg(feature = "logging")]
        tracing::debug!("discarded connection to {}", self.peer);
        drop(conn);
    }
}

/// A thread-safe pool of [`Connection`]s to one [`Peer`].
///
/// Cloning is cheap and every clone shares the same connections. Lock hold
/// time is bounded to queue and counter updates; connecting and probing
/// happen on the caller's thread after [`fetch`](ConnectionPool::fetch).
///
/// Callers must hand back every fetched connection exactly once, through
/// [`release`](ConnectionPool::release) or
/// [`discard`](ConnectionPool::discard). The pool does not repair its
/// counters if that contract is broken.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    pub fn new(peer: Peer, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                peer: Arc::new(peer),
                config,
                inner: Mutex::new(PoolInner {
                    idle_conns: VecDeque::with_capacity(config.pool_size),
                    real_size: 0,
                }),
            }),
        }
    }

    /// Build the peer and the config in one go. Zero `pool_size` and
    /// `connect_timeout_ms` take their defaults.
    pub fn connect_to(
        host: impl Into<String>,
        port: u16,
        pool_size: usize,
        keepalive_timeout: Duration,
        connect_timeout_ms: u64,
    ) -> Self {
        Self::new(
            Peer::new(host, port, connect_timeout_ms),
            PoolConfig::new(keepalive_timeout).pool_size(pool_size),
        )
    }

    /// Check out a connection, creating one when none is idle.
    ///
    /// The connection may have no socket yet, or a stale one; call
    /// [`Connection::get_connect_sock`] before doing I/O.
    #[inline]
    pub fn fetch(&self) -> Result<Connection> {
        self.shared.fetch()
    }

    /// Check a connection back in, possibly evicting one that idled too long.
    ///
    /// Returns `false` and closes `conn` when it was not fetched from this
    /// pool or one of its clones, even if it points at an equal peer. The
    /// pool it did come from keeps counting it in its real size.
    #[inline]
    pub fn release(&self, conn: Connection) -> bool {
        self.shared.release(conn)
    }

    /// Destroy a checked out connection instead of returning it.
    #[inline]
    pub fn discard(&self, conn: Connection) {
        self.shared.discard(conn)
    }

    /// Fetch a connection with a usable socket, wrapped in a guard that
    /// releases it on drop.
    pub fn checkout(&self) -> Result<Pooled> {
        let mut conn = self.shared.fetch()?;
        if let Err(e) = conn.get_connect_sock().map(|_| ()) {
            self.shared.release(conn);
            return Err(e.into());
        }
        Ok(Pooled::new(conn, Arc::downgrade(&self.shared)))
    }

    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.shared.peer
    }

    #[inline]
    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size
    }

    #[inline]
    pub fn keepalive_timeout(&self) -> Duration {
        self.shared.config.keepalive_timeout
    }

    /// Connections created and not yet destroyed.
    pub fn real_size(&self) -> usize {
        self.shared.inner.lock().real_size
    }

    /// Connections currently sitting in the pool.
    pub fn idle_size(&self) -> usize {
        self.shared.inner.lock().idle_conns.len()
    }
}
