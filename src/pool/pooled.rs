use std::{
    ops::{Deref, DerefMut},
    sync::Weak,
};

use super::{Connection, Shared};

/// A checked out [`Connection`] that goes back to its pool when dropped.
///
/// A guard marked not reusable destroys the connection instead. If the pool
/// is gone by the time the guard drops, the connection is just closed.
#[derive(Debug)]
pub struct Pooled {
    // option is for take when drop
    conn: Option<Connection>,
    pool: Weak<Shared>,
    reusable: bool,
}

impl Pooled {
    #[inline]
    pub(crate) fn new(conn: Connection, pool: Weak<Shared>) -> Self {
        Self {
            conn: Some(conn),
            pool,
            reusable: true,
        }
    }

    /// Mark the connection broken, e.g. after a protocol error left unread
    /// bytes on the socket.
    #[inline]
    pub fn set_reusable(&mut self, reusable: bool) {
        self.reusable = reusable;
    }

    #[inline]
    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    /// Detach the connection from the guard. The caller is then responsible
    /// for releasing it.
    #[inline]
    pub fn into_inner(mut self) -> Connection {
        self.conn.take().expect("not dropped")
    }
}

impl Deref for Pooled {
    type Target = Connection;

    #[inline]
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("not dropped")
    }
}

impl DerefMut for Pooled {
    #[inline]
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("not dropped")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) if self.reusable => {
                pool.release(conn);
            }
            Some(pool) => pool.discard(conn),
            None => {
                #[cfg(feature = "logging")]
                tracing::debug!("pool dropped, closing connection to {}", conn.peer());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, time::Duration};

    use crate::{ConnectionPool, Peer, PoolConfig, PoolError};

    fn pool() -> (TcpListener, ConnectionPool) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let peer = Peer::new("127.0.0.1", listener.local_addr().unwrap().port(), 1000);
        (listener, ConnectionPool::new(peer, PoolConfig::new(Duration::from_secs(60))))
    }

    #[test]
    fn drop_releases() {
        let (_listener, pool) = pool();
        {
            let conn = pool.checkout().unwrap();
            assert!(conn.is_open());
            assert!(conn.socket().is_some());
            // checkout connects once, the socket is ready without another check
            assert_eq!(conn.reuse_count(), 1);
            assert_eq!((pool.real_size(), pool.idle_size()), (1, 0));
        }
        assert_eq!((pool.real_size(), pool.idle_size()), (1, 1));

        let conn = pool.checkout().unwrap();
        assert_eq!(conn.reuse_count(), 2);
    }

    #[test]
    fn not_reusable_is_discarded() {
        let (_listener, pool) = pool();
        let mut conn = pool.checkout().unwrap();
        conn.set_reusable(false);
        drop(conn);
        assert_eq!((pool.real_size(), pool.idle_size()), (0, 0));
    }

    #[test]
    fn into_inner_detaches() {
        let (_listener, pool) = pool();
        let conn = pool.checkout().unwrap().into_inner();
        assert_eq!((pool.real_size(), pool.idle_size()), (1, 0));
        assert!(pool.release(conn));
        assert_eq!((pool.real_size(), pool.idle_size()), (1, 1));
    }

    #[test]
    fn outlives_pool() {
        let (_listener, pool) = pool();
        let conn = pool.checkout().unwrap();
        drop(pool);
        assert!(conn.is_open());
        drop(conn);
    }

    #[test]
    fn connect_failure_returns_connection() {
        let (listener, pool) = pool();
        drop(listener);

        let err = pool.checkout().unwrap_err();
        assert!(matches!(err, PoolError::Connect(_)));
        assert_eq!((pool.real_size(), pool.idle_size()), (1, 1));
    }
}
