use std::{io, time::Duration};

use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum ConnectError {
    #[error("resolve {peer} error {source}")]
    Resolve { peer: String, source: io::Error },
    #[error("no address resolved for {0}")]
    NoResolve(String),
    #[error("create socket for {peer} error {source}")]
    SocketCreate { peer: String, source: io::Error },
    #[error("configure socket for {peer} error {source}")]
    SocketConfig { peer: String, source: io::Error },
    #[error("connect to {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },
    #[error("connect to {peer} refused")]
    Refused { peer: String },
    #[error("connect to {peer} failed {source}")]
    Failed { peer: String, source: io::Error },
}

#[derive(ThisError, Debug)]
pub enum PoolError {
    #[error("reserve room for a new connection failed {0}")]
    Allocation(#[from] std::collections::TryReserveError),
    #[error("connect error {0}")]
    Connect(#[from] ConnectError),
}

pub type Error = PoolError;
pub type Result<T> = std::result::Result<T, Error>;
