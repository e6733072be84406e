use std::{
    net::SocketAddr,
    os::fd::{AsRawFd, RawFd},
    sync::Arc,
    time::{Duration, Instant},
};

use socket2::Socket;

use crate::{
    connectors::{pollio, Connector, TcpConnector},
    error::ConnectError,
    Peer,
};

/// One reusable TCP socket to a [`Peer`].
///
/// A connection starts without a socket. [`get_connect_sock`] establishes one
/// lazily and re-establishes it when the previous one went stale. It holds at
/// most one socket at a time.
///
/// [`get_connect_sock`]: Connection::get_connect_sock
#[derive(Debug)]
pub struct Connection {
    peer: Arc<Peer>,
    socket: Option<Socket>,
    last_active: Option<Instant>,
    reuse_count: u64,
}

impl Connection {
    #[inline]
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            socket: None,
            last_active: None,
            reuse_count: 0,
        }
    }

    #[inline]
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Replace the current socket, if any, with a freshly connected one.
    ///
    /// On failure the connection is left without a socket.
    pub fn connect(&mut self, nonblocking: bool) -> Result<(), ConnectError> {
        self.close();
        self.socket = Some(TcpConnector::new(nonblocking).connect(&*self.peer)?);
        Ok(())
    }

    /// Whether the current socket can be handed out as is. Never blocks.
    pub fn is_valid(&self) -> bool {
        match &self.socket {
            Some(socket) => pollio::probe_alive(socket),
            None => false,
        }
    }

    /// Return a usable socket, reconnecting in non-blocking mode when the
    /// current one is missing or stale.
    ///
    /// Every success counts as one use: the reuse counter goes up and the
    /// last active time is refreshed.
    pub fn get_connect_sock(&mut self) -> Result<&Socket, ConnectError> {
        let socket = match self.socket.take() {
            Some(socket) if pollio::probe_alive(&socket) => socket,
            _stale => {
                #[cfg(feature = "logging")]
                if _stale.is_some() {
                    tracing::debug!("stale socket to {}, reconnecting", self.peer);
                }
                drop(_stale);
                TcpConnector::new(true).connect(&*self.peer)?
            }
        };

        self.reuse_count += 1;
        self.last_active = Some(Instant::now());
        Ok(&*self.socket.insert(socket))
    }

    /// Close the socket. Calling it on a closed connection does nothing.
    #[inline]
    pub fn close(&mut self) {
        // dropping the socket closes the descriptor
        self.socket = None;
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    /// Remote address of the live socket, for diagnostics.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        self.socket
            .as_ref()?
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
    }

    #[inline]
    pub fn last_active(&self) -> Option<Instant> {
        self.last_active
    }

    #[inline]
    pub fn reuse_count(&self) -> u64 {
        self.reuse_count
    }

    #[inline]
    pub fn socket(&self) -> Option<&Socket> {
        self.socket.as_ref()
    }

    #[inline]
    pub fn sock(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    /// Whether this connection was created against exactly `peer`, not merely
    /// an equal one.
    #[inline]
    pub(crate) fn belongs_to(&self, peer: &Arc<Peer>) -> bool {
        Arc::ptr_eq(&self.peer, peer)
    }

    /// Time since the last successful checkout, `None` if never used.
    #[inline]
    pub(crate) fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_active
            .map(|last_active| now.saturating_duration_since(last_active))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
    };

    use super::*;

    fn listener() -> (TcpListener, Arc<Peer>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Arc::new(Peer::new("127.0.0.1", port, 1000)))
    }

    #[test]
    fn new_connection_is_empty() {
        let (_listener, peer) = listener();
        let conn = Connection::new(peer);
        assert!(!conn.is_open());
        assert!(!conn.is_valid());
        assert_eq!(conn.sock(), None);
        assert_eq!(conn.peer_address(), None);
        assert_eq!(conn.last_active(), None);
        assert_eq!(conn.reuse_count(), 0);
    }

    #[test]
    fn get_connect_sock_reuses_live_socket() {
        let (listener, peer) = listener();
        let mut conn = Connection::new(peer);

        conn.get_connect_sock().unwrap();
        let fd = conn.sock();
        let first_active = conn.last_active().unwrap();
        assert_eq!(conn.reuse_count(), 1);
        assert_eq!(conn.peer_address(), Some(listener.local_addr().unwrap()));
        let (_server, _) = listener.accept().unwrap();

        thread::sleep(Duration::from_millis(5));
        conn.get_connect_sock().unwrap();
        assert_eq!(conn.sock(), fd);
        assert_eq!(conn.reuse_count(), 2);
        assert!(conn.last_active().unwrap() > first_active);
    }

    #[test]
    fn get_connect_sock_replaces_stale_socket() {
        let (listener, peer) = listener();
        let mut conn = Connection::new(peer);

        conn.get_connect_sock().unwrap();
        let local = conn.socket().unwrap().local_addr().unwrap().as_socket();
        let (server, _) = listener.accept().unwrap();
        drop(server);
        thread::sleep(Duration::from_millis(20));
        assert!(!conn.is_valid());

        conn.get_connect_sock().unwrap();
        assert!(conn.is_valid());
        let relocal = conn.socket().unwrap().local_addr().unwrap().as_socket();
        assert_ne!(local, relocal);
        assert_eq!(conn.reuse_count(), 2);
    }

    #[test]
    fn get_connect_sock_failure_leaves_connection_closed() {
        let peer = {
            let (listener, peer) = listener();
            drop(listener);
            peer
        };
        let mut conn = Connection::new(peer);

        assert!(conn.get_connect_sock().is_err());
        assert!(!conn.is_open());
        assert_eq!(conn.reuse_count(), 0);
        assert_eq!(conn.last_active(), None);
    }

    #[test]
    fn socket_carries_application_io() {
        let (listener, peer) = listener();
        let mut conn = Connection::new(peer);
        conn.connect(false).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        let mut socket = conn.get_connect_sock().unwrap();
        socket.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").unwrap();
        socket.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn close_is_idempotent() {
        let (_listener, peer) = listener();
        let mut conn = Connection::new(peer);
        conn.connect(true).unwrap();
        assert!(conn.is_open());

        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert!(!conn.is_valid());
    }

    #[test]
    fn connect_keeps_a_single_socket() {
        let (listener, peer) = listener();
        let mut conn = Connection::new(peer);
        conn.connect(true).unwrap();
        let (first_server, _) = listener.accept().unwrap();

        conn.connect(true).unwrap();
        let (_second_server, _) = listener.accept().unwrap();

        // the first socket was closed when the second one replaced it
        let mut first_server = first_server;
        let mut buf = [0u8; 1];
        assert_eq!(first_server.read(&mut buf).unwrap(), 0);
    }
}
