// ── Runtime pipeline configuration ──
//
// These types describe *what* data the pipeline serves (the schema) and
// *where* each domain lives (the endpoint mapping). They never touch
// disk: `strata-config` builds a `PipelineConfig` and hands it in.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::endpoint::Endpoint;
use crate::error::CoreError;

/// Top-level kind of the value stored under a domain key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ShapeKind {
    Object,
    Array,
    #[default]
    Value,
}

/// Shape descriptor for one domain key.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Shape {
    #[serde(rename = "type", default)]
    pub kind: ShapeKind,
    /// Value served when no endpoint is mapped for the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Shape {
    pub fn object() -> Self {
        Self {
            kind: ShapeKind::Object,
            default: None,
        }
    }

    pub fn array() -> Self {
        Self {
            kind: ShapeKind::Array,
            default: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// The value a key of this shape holds before anything is written.
    pub fn empty_value(&self) -> Value {
        if let Some(default) = &self.default {
            return default.clone();
        }
        match self.kind {
            ShapeKind::Object => Value::Object(serde_json::Map::new()),
            ShapeKind::Array => Value::Array(Vec::new()),
            ShapeKind::Value => Value::Null,
        }
    }

    fn default_matches_kind(&self) -> bool {
        match (&self.kind, &self.default) {
            (_, None) | (ShapeKind::Value, Some(_)) => true,
            (ShapeKind::Object, Some(v)) => v.is_object(),
            (ShapeKind::Array, Some(v)) => v.is_array(),
        }
    }
}

/// Mapping from domain key to its shape descriptor.
pub type Schema = IndexMap<String, Shape>;

/// Schema plus endpoint mapping: everything a stack is built from.
#[derive(Clone, Default)]
pub struct PipelineConfig {
    pub schema: Schema,
    pub endpoint: IndexMap<String, Arc<dyn Endpoint>>,
}

impl PipelineConfig {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            endpoint: IndexMap::new(),
        }
    }

    pub fn with_shape(mut self, key: impl Into<String>, shape: Shape) -> Self {
        self.schema.insert(key.into(), shape);
        self
    }

    pub fn with_endpoint(mut self, key: impl Into<String>, endpoint: Arc<dyn Endpoint>) -> Self {
        self.endpoint.insert(key.into(), endpoint);
        self
    }

    /// The schema key *set*; stack rebuilds are keyed on this.
    pub fn schema_keys(&self) -> BTreeSet<String> {
        self.schema.keys().cloned().collect()
    }

    /// Look up the shape for a data key (by its domain segment).
    pub fn shape(&self, key: &str) -> Option<&Shape> {
        self.schema.get(split_key(key))
    }

    /// Look up the endpoint for a data key (by its domain segment).
    pub fn endpoint(&self, key: &str) -> Option<Arc<dyn Endpoint>> {
        self.endpoint.get(split_key(key)).map(Arc::clone)
    }

    /// Reject configurations no stack can be built from.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (key, shape) in &self.schema {
            if key.is_empty() || key.contains('/') {
                return Err(CoreError::config(format!(
                    "schema key '{key}' must be a non-empty single path segment"
                )));
            }
            if !shape.default_matches_kind() {
                return Err(CoreError::config(format!(
                    "default for '{key}' does not match its declared type '{}'",
                    shape.kind
                )));
            }
        }
        if let Some(orphan) = self.endpoint.keys().find(|k| !self.schema.contains_key(*k)) {
            return Err(CoreError::config(format!(
                "endpoint '{orphan}' has no matching schema key"
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("schema", &self.schema)
            .field(
                "endpoint",
                &self
                    .endpoint
                    .iter()
                    .map(|(k, e)| (k.as_str(), e.kind()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Domain segment of a data key: `"users/1"` → `"users"`.
pub fn split_key(key: &str) -> &str {
    key.split_once('/').map_or(key, |(domain, _)| domain)
}

/// Item segment of a nested data key: `"users/1"` → `Some("1")`.
pub fn nested_segment(key: &str) -> Option<&str> {
    key.split_once('/')
        .map(|(_, rest)| rest)
        .filter(|rest| !rest.is_empty())
}
