// In-process endpoint backed by a `DashMap`.
//
// Nested keys (`"users/1"`) resolve to the item with that id inside the
// domain array, mirroring how an HTTP endpoint would route them.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture};
use serde_json::Value;
use tracing::debug;

use super::Endpoint;
use crate::action::Action;
use crate::config::{nested_segment, split_key};
use crate::context::Query;
use crate::error::CoreError;
use crate::mutate;

#[derive(Debug, Default)]
pub struct MemoryEndpoint {
    data: DashMap<String, Value>,
    fetches: AtomicUsize,
    deploys: AtomicUsize,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Current committed value for a domain key.
    pub fn value(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::Relaxed)
    }

    /// Commit `actions` into the domain value and return what `key` now
    /// resolves to.
    fn commit(&self, key: &str, actions: &[Action]) -> Result<Value, CoreError> {
        let domain = split_key(key);
        let actions: Vec<Action> = actions.iter().map(Action::to_domain).collect();
        {
            let mut entry = self.data.entry(domain.to_owned()).or_insert(Value::Null);
            let committed = mutate::apply_all(entry.value(), &actions)?;
            *entry.value_mut() = committed;
        }
        debug!(%key, %domain, actions = actions.len(), "memory endpoint committed");
        Ok(self.lookup(key))
    }

    fn lookup(&self, key: &str) -> Value {
        if let Some(v) = self.data.get(key) {
            return v.value().clone();
        }
        let domain = split_key(key);
        let Some(id) = nested_segment(key) else {
            return Value::Null;
        };
        self.data
            .get(domain)
            .and_then(|items| {
                items
                    .as_array()?
                    .iter()
                    .find(|item| mutate::item_id(item).as_deref() == Some(id))
                    .cloned()
            })
            .unwrap_or(Value::Null)
    }
}

impl Endpoint for MemoryEndpoint {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn fetch<'a>(&'a self, key: &'a str, _query: &'a Query) -> BoxFuture<'a, Result<Value, CoreError>> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Box::pin(future::ready(Ok(self.lookup(key))))
    }

    fn deploy<'a>(
        &'a self,
        key: &'a str,
        _id: Option<&'a str>,
        actions: &'a [Action],
    ) -> BoxFuture<'a, Result<Option<Value>, CoreError>> {
        self.deploys.fetch_add(1, Ordering::Relaxed);
        Box::pin(future::ready(self.commit(key, actions).map(Some)))
    }
}
