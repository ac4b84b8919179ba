//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use strata_config::ConfigError;
use strata_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found")]
    #[diagnostic(
        code(strata::no_config),
        help(
            "Create one with: strata init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(strata::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(strata::config))]
    Config(Box<ConfigError>),

    #[error("Invalid configuration: {reason}")]
    #[diagnostic(
        code(strata::invalid_config),
        help("Every [endpoint.<key>] table needs a matching [schema.<key>] table.")
    )]
    InvalidConfig { reason: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Unknown data key '{key}'")]
    #[diagnostic(
        code(strata::unknown_key),
        help("Run: strata schema to see the configured keys")
    )]
    UnknownKey { key: String },

    #[error("Endpoint error for '{key}': {message}")]
    #[diagnostic(code(strata::endpoint))]
    Endpoint {
        key: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Could not reach the endpoint: {message}")]
    #[diagnostic(
        code(strata::connection_failed),
        help("Check the endpoint URL in strata.toml and that the service is running.")
    )]
    Connection { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(strata::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(strata::pipeline))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(strata::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render YAML: {0}")]
    #[diagnostic(code(strata::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoConfig { .. } | Self::Config(_) | Self::InvalidConfig { .. } => {
                exit_code::CONFIG
            }
            Self::ConfigExists { .. } => exit_code::CONFLICT,
            Self::UnknownKey { .. } => exit_code::NOT_FOUND,
            Self::Endpoint {
                status: Some(404), ..
            } => exit_code::NOT_FOUND,
            Self::Connection { .. } => exit_code::CONNECTION,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownKey { key } => CliError::UnknownKey { key },

            CoreError::Endpoint {
                key,
                message,
                status,
            } => CliError::Endpoint {
                key,
                message,
                status,
            },

            CoreError::Transport(e) => CliError::Connection {
                message: e.to_string(),
            },

            CoreError::InvalidAction { kind, key, reason } => CliError::Validation {
                field: format!("{kind} on '{key}'"),
                reason,
            },

            CoreError::Config { message } => CliError::InvalidConfig { reason: message },

            other => CliError::Core(other),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NotFound { path } => CliError::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Core(core) => core.into(),
            other => CliError::Config(Box::new(other)),
        }
    }
}
