use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 100;

/// Address and connect budget of the remote endpoint a pool talks to.
///
/// A zero connect timeout is replaced by 100ms, both on construction and
/// when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawPeer")]
pub struct Peer {
    host: String,
    port: u16,
    connect_timeout_ms: u64,
}

#[derive(Deserialize)]
struct RawPeer {
    host: String,
    port: u16,
    #[serde(default)]
    connect_timeout_ms: u64,
}

impl From<RawPeer> for Peer {
    #[inline]
    fn from(raw: RawPeer) -> Self {
        Self::new(raw.host, raw.port, raw.connect_timeout_ms)
    }
}

impl Peer {
    pub fn new(host: impl Into<String>, port: u16, connect_timeout_ms: u64) -> Self {
        let connect_timeout_ms = match connect_timeout_ms {
            0 => DEFAULT_CONNECT_TIMEOUT_MS,
            n => n,
        };
        Self {
            host: host.into(),
            port,
            connect_timeout_ms,
        }
    }

    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    pub fn connect_timeout_ms(&self) -> u64 {
        self.connect_timeout_ms
    }

    #[inline]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let peer = Peer::new("127.0.0.1", 8080, 0);
        assert_eq!(peer.connect_timeout_ms(), 100);
        assert_eq!(peer.connect_timeout(), Duration::from_millis(100));

        let peer = Peer::new("127.0.0.1", 8080, 250);
        assert_eq!(peer.connect_timeout_ms(), 250);
    }

    #[test]
    fn display() {
        assert_eq!(Peer::new("10.0.0.1", 80, 1).to_string(), "10.0.0.1:80");
        assert_eq!(Peer::new("::1", 80, 1).to_string(), "[::1]:80");
    }

    #[test]
    fn deserialize_normalizes_timeout() {
        let peer: Peer = serde_json::from_str(r#"{"host":"localhost","port":9000}"#).unwrap();
        assert_eq!(peer.host(), "localhost");
        assert_eq!(peer.port(), 9000);
        assert_eq!(peer.connect_timeout_ms(), 100);

        let peer: Peer =
            serde_json::from_str(r#"{"host":"localhost","port":9000,"connect_timeout_ms":0}"#)
                .unwrap();
        assert_eq!(peer.connect_timeout_ms(), 100);
    }
}
