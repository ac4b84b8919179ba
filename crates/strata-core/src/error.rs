// ── Core error types ──
//
// Every failure a pipeline run can produce. Layers return these
// unchanged through the runner; the facade hands them to the caller
// as-is. Nothing in the core logs-and-swallows an error.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Pipeline is not configured")]
    Uninitialized,

    #[error("No layer handled the {kind} request for '{key}'")]
    Unhandled { kind: &'static str, key: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Unknown data key '{key}' (not present in schema)")]
    UnknownKey { key: String },

    #[error("Invalid {kind} action on '{key}': {reason}")]
    InvalidAction {
        kind: String,
        key: String,
        reason: String,
    },

    // ── Endpoint errors ──────────────────────────────────────────────
    #[error("Endpoint error for '{key}': {message}")]
    Endpoint {
        key: String,
        message: String,
        /// HTTP status code (if the endpoint is remote).
        status: Option<u16>,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_key(key: impl Into<String>) -> Self {
        Self::UnknownKey { key: key.into() }
    }

    /// Returns `true` if retrying the same remote call might succeed.
    ///
    /// Connection failures, timeouts, throttling and 5xx responses count;
    /// everything else is a deterministic failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Endpoint {
                status: Some(status),
                ..
            } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Short machine-readable code, used by the CLI for exit codes.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Uninitialized => "uninitialized",
            Self::Unhandled { .. } => "unhandled",
            Self::UnknownKey { .. } => "unknown_key",
            Self::InvalidAction { .. } => "invalid_action",
            Self::Endpoint { .. } => "endpoint",
            Self::Transport(_) => "transport",
            Self::Internal(_) => "internal",
        }
    }
}
