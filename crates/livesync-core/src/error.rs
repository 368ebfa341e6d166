// ── Core error types ──
//
// Domain errors from livesync-core. Consumers never see HTTP status codes
// or frame parse failures directly: the `From<livesync_api::Error>` impl
// sorts transport-layer errors into the taxonomy the engine acts on.

use serde::Serialize;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Taxonomy the engine branches on ──────────────────────────────
    /// Connectivity-class failure. Retryable; surfaced only for
    /// user-initiated actions.
    #[error("Network unavailable: {message}")]
    NetworkTransient { message: String },

    /// The bearer credential was refused. Needs an external refresh.
    #[error("Credential rejected: {message}")]
    AuthRejected { message: String },

    /// The server refused the request itself. Never queued, never retried.
    #[error("Rejected by server: {message}")]
    ValidationRejected { message: String },

    #[error("Push subscription for '{resource}' dropped: {reason}")]
    SubscriptionDropped { resource: String, reason: String },

    #[error("Loading did not finish within {timeout_ms}ms")]
    WatchdogTimeout { timeout_ms: u64 },

    // ── Flow control ─────────────────────────────────────────────────
    /// A newer fetch for the same resource was issued; this result is void.
    #[error("Fetch for '{resource}' was superseded by a newer request")]
    Superseded { resource: String },

    #[error("Controller disconnected")]
    Disconnected,

    // ── Local failures ───────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Fieldless mirror of [`CoreError`] variants, cheap to copy into views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkTransient,
    AuthRejected,
    ValidationRejected,
    SubscriptionDropped,
    WatchdogTimeout,
    Superseded,
    Disconnected,
    Storage,
    Serialization,
    Config,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NetworkTransient { .. } => ErrorKind::NetworkTransient,
            Self::AuthRejected { .. } => ErrorKind::AuthRejected,
            Self::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            Self::SubscriptionDropped { .. } => ErrorKind::SubscriptionDropped,
            Self::WatchdogTimeout { .. } => ErrorKind::WatchdogTimeout,
            Self::Superseded { .. } => ErrorKind::Superseded,
            Self::Disconnected => ErrorKind::Disconnected,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Connectivity-class: a write failing this way belongs in the queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkTransient { .. })
    }

    /// Whether a background (non user-initiated) refresh should still
    /// report this error to the view. Transient failures stay silent.
    pub fn is_surfaced_in_background(&self) -> bool {
        matches!(
            self,
            Self::AuthRejected { .. } | Self::ValidationRejected { .. }
        )
    }
}

// One fetch outcome can be handed to several waiting requests. The io and
// serde_json payloads are not `Clone`, so those two are rebuilt from their
// kind and message.
impl Clone for CoreError {
    fn clone(&self) -> Self {
        match self {
            Self::NetworkTransient { message } => Self::NetworkTransient {
                message: message.clone(),
            },
            Self::AuthRejected { message } => Self::AuthRejected {
                message: message.clone(),
            },
            Self::ValidationRejected { message } => Self::ValidationRejected {
                message: message.clone(),
            },
            Self::SubscriptionDropped { resource, reason } => Self::SubscriptionDropped {
                resource: resource.clone(),
                reason: reason.clone(),
            },
            Self::WatchdogTimeout { timeout_ms } => Self::WatchdogTimeout {
                timeout_ms: *timeout_ms,
            },
            Self::Superseded { resource } => Self::Superseded {
                resource: resource.clone(),
            },
            Self::Disconnected => Self::Disconnected,
            Self::Storage(e) => Self::Storage(std::io::Error::new(e.kind(), e.to_string())),
            Self::Serialization(e) => {
                Self::Serialization(<serde_json::Error as serde::de::Error>::custom(e))
            }
            Self::Config { message } => Self::Config {
                message: message.clone(),
            },
        }
    }
}

/// A cloneable record of an error, as handed to views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SurfacedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CoreError> for SurfacedError {
    fn from(err: &CoreError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<livesync_api::Error> for CoreError {
    fn from(err: livesync_api::Error) -> Self {
        if err.is_auth_rejected() {
            return CoreError::AuthRejected {
                message: err.to_string(),
            };
        }
        if err.is_transient() {
            return CoreError::NetworkTransient {
                message: err.to_string(),
            };
        }
        match err {
            livesync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            livesync_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS setup failed: {msg}"),
            },
            // Remaining transport errors (redirect loops, body decode)
            // would fail identically on every retry.
            other => CoreError::ValidationRejected {
                message: other.to_string(),
            },
        }
    }
}
