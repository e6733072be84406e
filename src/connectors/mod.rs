//! Socket establishment.
//!
//! A [`Connector`] turns a key (here a [`Peer`](crate::Peer)) into a connected
//! transport. [`TcpConnector`] is the only transport this crate ships: a
//! non-blocking connect bounded by the peer's connect timeout.
pub(crate) mod pollio;
mod tcp_connector;

pub use tcp_connector::*;

pub trait Connector<K> {
    type Connection;
    type Error;

    fn connect(&self, key: K) -> Result<Self::Connection, Self::Error>;
}
