//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use livesync_config::ConfigError;
use livesync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const REJECTED: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Endpoint unreachable: {message}")]
    #[diagnostic(
        code(livesync::unreachable),
        help(
            "Check that the endpoint is running and reachable.\n\
             Writes sent while offline are kept in the queue: livesync queue list"
        )
    )]
    Unreachable { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Credential rejected: {message}")]
    #[diagnostic(
        code(livesync::auth_rejected),
        help(
            "Refresh the bearer token, then retry.\n\
             Run: livesync config set-token --token <TOKEN>"
        )
    )]
    AuthRejected { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(livesync::no_credentials),
        help("Set LIVESYNC_TOKEN, or run: livesync config set-token --token <TOKEN>")
    )]
    NoCredentials { profile: String },

    // ── Server ───────────────────────────────────────────────────────
    #[error("Rejected by server: {message}")]
    #[diagnostic(
        code(livesync::rejected),
        help("The request itself was refused; retrying will not help.")
    )]
    Rejected { message: String },

    #[error(transparent)]
    #[diagnostic(code(livesync::core))]
    Core(CoreError),

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(livesync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(livesync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: livesync config init --endpoint <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No endpoint configured")]
    #[diagnostic(
        code(livesync::no_config),
        help(
            "Pass --endpoint, or create a profile with: livesync config init --endpoint <URL>\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(livesync::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON payload: {0}")]
    #[diagnostic(code(livesync::json), help("Check the JSON payload and try again."))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthRejected { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Validation { .. } | Self::Json(_) | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NetworkTransient { message } => CliError::Unreachable { message },
            CoreError::AuthRejected { message } => CliError::AuthRejected { message },
            CoreError::ValidationRejected { message } => CliError::Rejected { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            other => CliError::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}
