use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    os::fd::AsRawFd,
    time::Instant,
};

use libc::{EINPROGRESS, POLLOUT};
use socket2::{Domain, Protocol, Socket, Type};

use super::{
    pollio::{poll_fd, BROKEN},
    Connector,
};
use crate::{error::ConnectError, Peer};

/// Send and receive buffer hint applied to every socket.
pub const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

/// Connects to a [`Peer`] without ever blocking longer than its connect
/// timeout.
///
/// The connect itself always runs in non-blocking mode; `nonblocking` only
/// decides the mode the socket is left in once connected. TCP keepalive and
/// `TCP_NODELAY` are always enabled.
#[derive(Default, Clone, Copy, Debug)]
pub struct TcpConnector {
    pub nonblocking: bool,
}

enum ConnectState {
    Unconnected(SocketAddr),
    Connecting(Socket),
    Connected(Socket),
}

impl TcpConnector {
    #[inline]
    pub const fn new(nonblocking: bool) -> Self {
        Self { nonblocking }
    }

    fn resolve(peer: &Peer) -> Result<SocketAddr, ConnectError> {
        (peer.host(), peer.port())
            .to_socket_addrs()
            .map_err(|source| ConnectError::Resolve {
                peer: peer.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| ConnectError::NoResolve(peer.to_string()))
    }

    fn start(&self, addr: SocketAddr, peer: &Peer) -> Result<ConnectState, ConnectError> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|source| ConnectError::SocketCreate {
                peer: peer.to_string(),
                source,
            })?;
        socket
            .set_nonblocking(true)
            .map_err(|source| ConnectError::SocketConfig {
                peer: peer.to_string(),
                source,
            })?;

        // we will ignore the buffer size errors, they are only a hint
        let _ = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE);
        let _ = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE);

        match socket.connect(&addr.into()) {
            Ok(()) => Ok(ConnectState::Connected(socket)),
            Err(e) if e.raw_os_error() == Some(EINPROGRESS) => {
                Ok(ConnectState::Connecting(socket))
            }
            Err(e) => Err(refused_or_failed(e, peer)),
        }
    }

    fn wait_connected(&self, socket: &Socket, peer: &Peer) -> Result<(), ConnectError> {
        let timeout = peer.connect_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let revents = match poll_fd(socket.as_raw_fd(), POLLOUT, remaining) {
                Ok(revents) => revents,
                // resume with whatever budget is left
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(refused_or_failed(e, peer)),
            };
            if revents == 0 {
                return Err(ConnectError::Timeout {
                    peer: peer.to_string(),
                    timeout,
                });
            }

            // A refused connect reports POLLOUT together with POLLERR, the
            // pending socket error tells the two apart.
            match socket.take_error() {
                Ok(Some(e)) | Err(e) => return Err(refused_or_failed(e, peer)),
                Ok(None) => (),
            }
            if revents & BROKEN != 0 {
                return Err(ConnectError::Failed {
                    peer: peer.to_string(),
                    source: io::Error::new(io::ErrorKind::ConnectionAborted, "socket hung up"),
                });
            }
            if revents & POLLOUT != 0 {
                return Ok(());
            }
        }
    }

    fn finish(&self, socket: &Socket, peer: &Peer) -> Result<(), ConnectError> {
        let config_err = |source| ConnectError::SocketConfig {
            peer: peer.to_string(),
            source,
        };
        if !self.nonblocking {
            socket.set_nonblocking(false).map_err(config_err)?;
        }
        socket.set_keepalive(true).map_err(config_err)?;
        socket.set_nodelay(true).map_err(config_err)?;
        Ok(())
    }
}

fn refused_or_failed(e: io::Error, peer: &Peer) -> ConnectError {
    if e.kind() == io::ErrorKind::ConnectionRefused {
        ConnectError::Refused {
            peer: peer.to_string(),
        }
    } else {
        ConnectError::Failed {
            peer: peer.to_string(),
            source: e,
        }
    }
}

impl<'a> Connector<&'a Peer> for TcpConnector {
    type Connection = Socket;
    type Error = ConnectError;

    /// Any error drops the half-built socket, which closes it.
    fn connect(&self, peer: &'a Peer) -> Result<Self::Connection, Self::Error> {
        #[cfg(feature = "logging")]
        tracing::debug!("connecting to {}", peer);

        let mut state = ConnectState::Unconnected(Self::resolve(peer)?);
        let result = loop {
            state = match state {
                ConnectState::Unconnected(addr) => match self.start(addr, peer) {
                    Ok(next) => next,
                    Err(e) => break Err(e),
                },
                ConnectState::Connecting(socket) => match self.wait_connected(&socket, peer) {
                    Ok(()) => ConnectState::Connected(socket),
                    Err(e) => break Err(e),
                },
                ConnectState::Connected(socket) => {
                    break self.finish(&socket, peer).map(|_| socket);
                }
            };
        };

        #[cfg(feature = "logging")]
        match &result {
            Ok(_) => tracing::debug!("connected to {}", peer),
            Err(e) => tracing::warn!("{}", e),
        }
        result
    }
}
