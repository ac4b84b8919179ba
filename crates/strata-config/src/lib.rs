//! Configuration for strata pipelines.
//!
//! A TOML file (`strata.toml`) merged with `STRATA_`-prefixed environment
//! variables, translated into a `strata_core::PipelineConfig`. The CLI
//! resolves the file path from `--config` or the platform config dir.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use strata_core::{
    CoreError, Endpoint, HttpEndpoint, HttpOptions, MemoryEndpoint, PipelineConfig, Shape,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Transport defaults for http endpoints.
    #[serde(default)]
    pub defaults: Defaults,

    /// Domain keys and their shapes.
    #[serde(default)]
    pub schema: IndexMap<String, Shape>,

    /// Where each domain key's data lives.
    #[serde(default)]
    pub endpoint: IndexMap<String, EndpointSpec>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout, seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Base retry delay, milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    200
}

/// One `[endpoint.<key>]` table, selected by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EndpointSpec {
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retries: Option<u32>,
    },
    /// In-process store, optionally seeded with an initial value.
    Memory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seed: Option<Value>,
    },
}

impl EndpointSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Memory { .. } => "memory",
        }
    }
}

impl Config {
    /// Starter configuration written by `strata init`.
    pub fn sample() -> Self {
        let mut schema = IndexMap::new();
        schema.insert("users".to_owned(), Shape::array());
        schema.insert(
            "settings".to_owned(),
            Shape::object().with_default(json!({"theme": "dark"})),
        );

        let mut endpoint = IndexMap::new();
        endpoint.insert(
            "users".to_owned(),
            EndpointSpec::Memory {
                seed: Some(json!([{"id": "1", "name": "Ada"}])),
            },
        );

        Self {
            defaults: Defaults::default(),
            schema,
            endpoint,
        }
    }

    /// Build the core pipeline configuration, constructing one endpoint
    /// per `[endpoint.<key>]` table.
    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        let mut pipeline = PipelineConfig::new(self.schema.clone());
        for (key, spec) in &self.endpoint {
            let endpoint: Arc<dyn Endpoint> = match spec {
                EndpointSpec::Http {
                    url,
                    timeout,
                    retries,
                } => {
                    let base: url::Url = url.parse().map_err(|_| ConfigError::Validation {
                        field: format!("endpoint.{key}.url"),
                        reason: format!("invalid URL: {url}"),
                    })?;
                    let options = HttpOptions {
                        timeout: Duration::from_secs(timeout.unwrap_or(self.defaults.timeout)),
                        retries: retries.unwrap_or(self.defaults.retries),
                        backoff: Duration::from_millis(self.defaults.backoff_ms),
                    };
                    Arc::new(HttpEndpoint::new(base, options)?)
                }
                EndpointSpec::Memory { seed } => {
                    let memory = MemoryEndpoint::new();
                    Arc::new(match seed {
                        Some(seed) => memory.with_value(key.clone(), seed.clone()),
                        None => memory,
                    })
                }
            };
            debug!(%key, kind = spec.kind(), "endpoint configured");
            pipeline.endpoint.insert(key.clone(), endpoint);
        }
        pipeline.validate()?;
        Ok(pipeline)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "strata", "strata").map_or_else(
        || PathBuf::from("strata.toml"),
        |dirs| dirs.config_dir().join("strata.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
///
/// An explicit `path` must exist; the default path may be absent, in
/// which case only defaults and environment apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(path) if !path.exists() => {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Some(path) => path.to_path_buf(),
        None => config_path(),
    };
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("STRATA_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}
