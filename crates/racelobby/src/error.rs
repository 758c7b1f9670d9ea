//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use racelobby_config::ConfigError;
use racelobby_core::{CoreError, LoadError, NetworkErrorKind};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Sources ──────────────────────────────────────────────────────
    #[error("Every source failed to load; first failure from '{source_key}': {message}")]
    #[diagnostic(code(racelobby::sources_failed), help("{help}"))]
    SourcesFailed {
        source_key: String,
        message: String,
        help: String,
        network: Option<NetworkErrorKind>,
    },

    #[error("Could not reach {what}: {message}")]
    #[diagnostic(
        code(racelobby::connection_failed),
        help("Check your network connection and the lobby_url setting.")
    )]
    ConnectionFailed { what: String, message: String },

    #[error("Request timed out: {message}")]
    #[diagnostic(
        code(racelobby::timeout),
        help("Increase timeout with --timeout or in the config file.")
    )]
    Timeout { message: String },

    // ── Lookup ───────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(racelobby::not_found),
        help("Run: racelobby {list_command} to see what is available")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(racelobby::validation))]
    Validation { field: String, reason: String },

    #[error("{message}")]
    #[diagnostic(code(racelobby::informative), help("{remedy}"))]
    Informative { message: String, remedy: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(racelobby::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(racelobby::config))]
    Config(#[from] ConfigError),

    // ── Unexpected ───────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(racelobby::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(racelobby::render))]
    Render(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::SourcesFailed { network, .. } => match network {
                Some(NetworkErrorKind::Timeout) => exit_code::TIMEOUT,
                Some(_) => exit_code::CONNECTION,
                None => exit_code::GENERAL,
            },
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ConfigExists { .. } | Self::Config(_) => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }

    /// A pack that ended in `Error` surfaces its first failing session.
    pub fn from_load_error(source_key: &str, err: &LoadError) -> Self {
        let help = match (&err.remedy, &err.details) {
            (Some(remedy), _) => remedy.clone(),
            (None, Some(details)) => format!("Details: {details}"),
            (None, None) => "Try again with -v for more detail.".into(),
        };
        Self::SourcesFailed {
            source_key: source_key.into(),
            message: err.message.clone(),
            help,
            network: err.network,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Informative { message, remedy } => Self::Informative { message, remedy },
            CoreError::Network {
                kind: NetworkErrorKind::Timeout,
                message,
            } => Self::Timeout { message },
            CoreError::Network { message, .. } => Self::ConnectionFailed {
                what: "server".into(),
                message,
            },
            CoreError::SourceNotFound { key } => Self::NotFound {
                resource_type: "list".into(),
                identifier: key,
                list_command: "lists show".into(),
            },
            CoreError::InvalidEntry { message } => Self::Validation {
                field: "server".into(),
                reason: message,
            },
            other @ (CoreError::Io { .. } | CoreError::Watch(_) | CoreError::Fatal { .. }) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<racelobby_api::Error> for CliError {
    fn from(err: racelobby_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
