// ── Write actions ──
//
// A write is described by an `Action`: what kind of change, against
// which data key, with an optional item id, field path and value.
// Actions are buffered by the bucket layer and shipped on deploy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{nested_segment, split_key};

/// The kind of change an action performs.
///
/// `Noop` is the sentinel the facade absorbs without running the
/// pipeline.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ActionKind {
    Noop,
    /// Replace or merge a value (whole key, item by id, or field path).
    Update,
    /// Append an item to an array key.
    Create,
    /// Remove an item by id, or a field by path.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Empty for `NOOP`.
    #[serde(default)]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Dot-separated field path inside the target value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub payload: ActionPayload,
}

impl Action {
    pub fn new(kind: ActionKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            payload: ActionPayload {
                key: key.into(),
                ..ActionPayload::default()
            },
        }
    }

    pub fn noop() -> Self {
        Self::new(ActionKind::Noop, "")
    }

    pub fn update(key: impl Into<String>, value: Value) -> Self {
        Self::new(ActionKind::Update, key).with_value(value)
    }

    pub fn create(key: impl Into<String>, value: Value) -> Self {
        Self::new(ActionKind::Create, key).with_value(value)
    }

    pub fn delete(key: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(ActionKind::Delete, key).with_id(id)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.payload.id = Some(id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.payload.path = Some(path.into());
        self
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.payload.value = value;
        self
    }

    pub fn key(&self) -> &str {
        &self.payload.key
    }

    pub fn is_noop(&self) -> bool {
        self.kind == ActionKind::Noop
    }

    /// Domain segment of the action key.
    pub fn domain(&self) -> &str {
        split_key(self.key())
    }

    /// The item this action targets: the nested key segment, else the
    /// payload id.
    pub fn target_id(&self) -> Option<&str> {
        nested_segment(self.key()).or(self.payload.id.as_deref())
    }

    /// Whether folding this action changes the value served for `key`.
    /// Every action of a domain applies to the domain key; a nested key
    /// only sees actions targeting its item.
    pub fn applies_to(&self, key: &str) -> bool {
        if self.domain() != split_key(key) {
            return false;
        }
        match nested_segment(key) {
            None => true,
            Some(id) => self.target_id() == Some(id),
        }
    }

    /// The same change addressed to the domain key, with a nested
    /// segment moved into the payload id: `UPDATE users/1` becomes
    /// `UPDATE users` with id `1`.
    pub fn to_domain(&self) -> Self {
        let Some(id) = nested_segment(self.key()) else {
            return self.clone();
        };
        let mut action = self.clone();
        action.payload.id = Some(id.to_owned());
        action.payload.key = self.domain().to_owned();
        action
    }
}
