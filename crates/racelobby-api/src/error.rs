use thiserror::Error;

/// Top-level error type for the `racelobby-api` crate.
///
/// Covers every failure mode of the lobby list, single-server `INFO`
/// queries and LAN discovery. `racelobby-core` maps these into its
/// informative / network / fatal taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (DNS failure, reset connection, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The remote host actively refused the connection.
    #[error("Connection refused by {address}")]
    ConnectionRefused { address: String },

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response body could not be understood, with the raw body for debugging.
    #[error("Malformed response: {message}")]
    Malformed { message: String, body: String },

    // ── LAN ─────────────────────────────────────────────────────────
    /// Socket-level failure during LAN discovery.
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` if this error is a timeout of any flavour.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout(),
            Self::Timeout { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Returns `true` if the remote end refused the connection.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_connect(),
            Self::ConnectionRefused { .. } => true,
            Self::Io(e) => e.kind() == std::io::ErrorKind::ConnectionRefused,
            _ => false,
        }
    }

    /// Returns `true` if the server answered but the payload was unusable.
    pub fn is_malformed(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_decode(),
            Self::Malformed { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        self.is_timeout() || self.is_connection_refused()
    }
}
