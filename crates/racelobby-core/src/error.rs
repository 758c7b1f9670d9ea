// ── Core error types ──
//
// Three families: informative (user-actionable, carries a remedy),
// network (classified transient failures) and fatal (anything else).
// The `From<racelobby_api::Error>` impl classifies transport errors so
// consumers never see HTTP or socket details directly.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionRefused,
    MalformedResponse,
    Cancelled,
    Other,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── User-actionable ──────────────────────────────────────────────
    #[error("{message}")]
    Informative { message: String, remedy: String },

    // ── Transient ────────────────────────────────────────────────────
    #[error("Network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    // ── Lists & files ────────────────────────────────────────────────
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot watch list directory: {0}")]
    Watch(#[from] notify::Error),

    // ── Lookup ───────────────────────────────────────────────────────
    #[error("Source not found: {key}")]
    SourceNotFound { key: String },

    #[error("Invalid entry: {message}")]
    InvalidEntry { message: String },

    // ── Unexpected ───────────────────────────────────────────────────
    #[error("Unexpected error: {message}")]
    Fatal { message: String },
}

impl CoreError {
    pub fn informative(message: impl Into<String>, remedy: impl Into<String>) -> Self {
        Self::Informative {
            message: message.into(),
            remedy: remedy.into(),
        }
    }

    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_informative(&self) -> bool {
        matches!(self, Self::Informative { .. })
    }

    /// Network classification, if this is a transient failure.
    pub fn network_kind(&self) -> Option<NetworkErrorKind> {
        match self {
            Self::Network { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Anything that is neither user-actionable nor a classified network failure.
    pub fn is_fatal(&self) -> bool {
        !self.is_informative() && self.network_kind().is_none()
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<racelobby_api::Error> for CoreError {
    fn from(err: racelobby_api::Error) -> Self {
        let kind = if err.is_timeout() {
            Some(NetworkErrorKind::Timeout)
        } else if err.is_connection_refused() {
            Some(NetworkErrorKind::ConnectionRefused)
        } else if err.is_malformed() {
            Some(NetworkErrorKind::MalformedResponse)
        } else {
            match &err {
                racelobby_api::Error::Transport(_) | racelobby_api::Error::Status { .. } => {
                    Some(NetworkErrorKind::Other)
                }
                _ => None,
            }
        };
        match kind {
            Some(kind) => Self::network(kind, err.to_string()),
            None => Self::fatal(err.to_string()),
        }
    }
}

// ── Error as data ────────────────────────────────────────────────────

/// The data form of a [`CoreError`], exposed by sessions, packs and entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadError {
    pub message: String,
    /// Short hint for informative errors.
    pub remedy: Option<String>,
    pub fatal: bool,
    pub network: Option<NetworkErrorKind>,
    /// Original error text for fatal errors, whose message is generic.
    pub details: Option<String>,
}

impl From<&CoreError> for LoadError {
    fn from(err: &CoreError) -> Self {
        match err {
            CoreError::Informative { message, remedy } => Self {
                message: message.clone(),
                remedy: Some(remedy.clone()),
                fatal: false,
                network: None,
                details: None,
            },
            CoreError::Network { kind, .. } => Self {
                message: err.to_string(),
                remedy: None,
                fatal: false,
                network: Some(*kind),
                details: None,
            },
            other => Self {
                message: "Something went wrong while loading servers".into(),
                remedy: None,
                fatal: true,
                network: None,
                details: Some(other.to_string()),
            },
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(remedy) = &self.remedy {
            write!(f, " ({remedy})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_are_classified() {
        let timeout: CoreError = racelobby_api::Error::Timeout { timeout_ms: 500 }.into();
        assert_eq!(timeout.network_kind(), Some(NetworkErrorKind::Timeout));

        let refused: CoreError = racelobby_api::Error::ConnectionRefused {
            address: "10.0.0.1:8081".into(),
        }
        .into();
        assert_eq!(refused.network_kind(), Some(NetworkErrorKind::ConnectionRefused));

        let malformed: CoreError = racelobby_api::Error::Malformed {
            message: "expected value".into(),
            body: String::new(),
        }
        .into();
        assert_eq!(malformed.network_kind(), Some(NetworkErrorKind::MalformedResponse));

        let io: CoreError =
            racelobby_api::Error::Io(std::io::Error::other("permission denied")).into();
        assert!(io.is_fatal());
    }

    #[test]
    fn load_error_keeps_remedy_and_hides_fatal_details() {
        let informative = LoadError::from(&CoreError::informative(
            "Identity required",
            "Sign in first",
        ));
        assert!(!informative.fatal);
        assert_eq!(informative.to_string(), "Identity required (Sign in first)");

        let fatal = LoadError::from(&CoreError::fatal("index out of range"));
        assert!(fatal.fatal);
        assert!(!fatal.message.contains("index"));
        assert!(fatal.details.unwrap().contains("index out of range"));
    }
}
