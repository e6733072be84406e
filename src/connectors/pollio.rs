//! `poll(2)` based readiness checks on raw socket descriptors.
//!
//! Two users: the connect path waits for writability to learn that a
//! non-blocking connect finished, and the liveness probe polls an idle socket
//! with a zero timeout to find out whether the remote end went away.
use std::{
    io::{self, Read},
    os::fd::{AsRawFd, RawFd},
    time::Duration,
};

use libc::{c_int, c_short, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};
use socket2::Socket;

pub(crate) const PROBE_ATTEMPTS: usize = 3;
const DRAIN_BUF_SIZE: usize = 10240;

/// Error, hangup or a descriptor closed underneath us.
pub(crate) const BROKEN: c_short = POLLERR | POLLHUP | POLLNVAL;

/// Poll a single descriptor, returning its `revents`. A timeout yields `0`.
pub(crate) fn poll_fd(fd: RawFd, events: c_short, timeout: Duration) -> io::Result<c_short> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms(timeout)) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pfd.revents)
}

// Round up so a sub-millisecond budget still waits instead of spinning.
fn timeout_ms(timeout: Duration) -> c_int {
    let ms = timeout.as_micros().div_ceil(1000);
    ms.min(c_int::MAX as u128) as c_int
}

/// Non-blocking liveness check of an established socket.
///
/// Any bytes the remote sent while the socket sat idle are drained and
/// dropped. End of stream, a read error, or an error/hangup condition marks
/// the socket dead. When the attempts run out without a verdict the socket is
/// reported dead as well.
pub(crate) fn probe_alive(socket: &Socket) -> bool {
    let fd = socket.as_raw_fd();
    let mut reader = socket;
    let mut buf = [0u8; DRAIN_BUF_SIZE];

    for _ in 0..PROBE_ATTEMPTS {
        let revents = match poll_fd(fd, POLLIN | POLLOUT, Duration::ZERO) {
            Ok(revents) => revents,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => return false,
        };

        if revents & BROKEN != 0 {
            #[cfg(feature = "logging")]
            tracing::debug!("idle socket failed validation, revents {:#x}", revents);
            return false;
        }
        if revents & POLLIN != 0 {
            match reader.read(&mut buf) {
                Ok(0) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("idle socket failed validation, closed by remote");
                    return false;
                }
                Ok(_n) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("discarded {} unexpected bytes from idle socket", _n);
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_e) => {
                    #[cfg(feature = "logging")]
                    tracing::debug!("idle socket failed validation, read error {}", _e);
                    return false;
                }
            }
        }
        if revents & POLLOUT != 0 {
            return true;
        }
    }
    #[cfg(feature = "logging")]
    tracing::debug!("idle socket failed validation, no verdict after {} polls", PROBE_ATTEMPTS);
    false
}
