// ── Core identity types ──
//
// ServerId is the stable key every source agrees on; ServerAddress is
// what the liveness scheduler needs to reach a server.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── ServerId ────────────────────────────────────────────────────────

/// Canonical identifier for a tracked server.
///
/// Normalised (trimmed, lower-cased) so that `10.0.0.1:8081` from the
/// lobby list and `10.0.0.1:8081 ` typed into a favourites file collapse
/// to the same entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_lowercase())
    }

    pub fn from_address(address: &ServerAddress) -> Self {
        Self::new(address.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The address encoded in this id, if it is of the `host:port` form.
    pub fn address(&self) -> Option<ServerAddress> {
        ServerAddress::parse(&self.0)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServerId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ── ServerAddress ───────────────────────────────────────────────────

/// Host plus the HTTP port a server answers `INFO` on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub http_port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, http_port: u16) -> Self {
        Self {
            host: host.into(),
            http_port,
        }
    }

    /// Parse `host:port` or `[v6]:port`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (host, port) = raw.rsplit_once(':')?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() || (host.contains(':') && !raw.starts_with('[')) {
            return None;
        }
        let http_port = port.parse::<u16>().ok().filter(|p| *p != 0)?;
        Some(Self::new(host.to_lowercase(), http_port))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.http_port)
        } else {
            write!(f, "{}:{}", self.host, self.http_port)
        }
    }
}
