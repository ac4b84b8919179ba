// Cache layer: committed values per data key, plus the observer registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::action::Action;
use crate::config::split_key;
use crate::context::{Context, Query, Request, Source};
use crate::error::CoreError;
use crate::mutate;
use crate::pipeline::{LayerFuture, Middleware, Next};
use crate::subscription::{Notification, ObserverRegistry, SubjectType};

/// Committed-value cache and subscription hub.
///
/// Entries are keyed by data key, with `?{canonical query}` appended for
/// fetches that carry a query. Only successful remote results are stored.
#[derive(Default)]
pub struct Cache {
    entries: DashMap<String, Value>,
    observers: Arc<ObserverRegistry>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str, query: &Query) -> Option<Value> {
        self.entries
            .get(&cache_key(key, query))
            .map(|v| v.value().clone())
    }

    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry belonging to `domain` (nested keys and query
    /// variants included).
    pub fn invalidate(&self, domain: &str) {
        self.entries.retain(|k, _| entry_domain(k) != domain);
    }

    fn notify_write(&self, key: &str, action: &Action, pending: &[Action]) -> Result<usize, CoreError> {
        let mut delivered = self.observers.notify(&Notification::Action {
            key: key.to_owned(),
            action: action.clone(),
        });
        let domain = split_key(key);
        if domain != key {
            delivered += self.observers.notify(&Notification::Action {
                key: domain.to_owned(),
                action: action.clone(),
            });
        }

        let watched = if domain == key { vec![key] } else { vec![key, domain] };
        for watched in watched {
            if !self.observers.has_observers(watched, SubjectType::Value) {
                continue;
            }
            let cached = self.entries.get(watched).map(|v| v.value().clone());
            if let Some(cached) = cached {
                let value = mutate::project(watched, &cached, pending)?;
                delivered += self.observers.notify(&Notification::Value {
                    key: watched.to_owned(),
                    value,
                });
            }
        }
        Ok(delivered)
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

fn cache_key(key: &str, query: &Query) -> String {
    if query.is_empty() {
        key.to_owned()
    } else {
        format!("{key}?{}", query.canonical())
    }
}

fn entry_domain(entry: &str) -> &str {
    split_key(entry.split_once('?').map_or(entry, |(path, _)| path))
}

impl Middleware for Cache {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn handle<'a>(&'a self, mut ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            match ctx.request() {
                Request::Fetch(fetch) => {
                    let entry = cache_key(&fetch.key, &fetch.query);
                    let hit = self.entries.get(&entry).map(|v| v.value().clone());
                    if let Some(value) = hit {
                        debug!(key = %entry, "cache hit");
                        ctx.response.data = Some(value);
                        ctx.response.source = Some(Source::Cache);
                        return Ok(ctx);
                    }
                    debug!(key = %entry, "cache miss");
                    let ctx = next.run(ctx).await?;
                    if let Some(value) = &ctx.response.data {
                        self.entries.insert(entry, value.clone());
                    }
                    Ok(ctx)
                }

                Request::Subscribe(sub) => {
                    let key = sub.key.clone();
                    let component_id = sub.component_id.clone();
                    let subject = sub.subject_type;
                    let observer = sub.observer.clone();
                    let mut ctx = next.run(ctx).await?;
                    ctx.response.subscription =
                        Some(self.observers.register(&key, &component_id, subject, observer));
                    Ok(ctx)
                }

                Request::Write(write) => {
                    let key = write.key.clone();
                    let action = write.action.clone();
                    let ctx = next.run(ctx).await?;
                    let delivered = self.notify_write(&key, &action, &ctx.response.pending)?;
                    debug!(%key, delivered, "write observers notified");
                    Ok(ctx)
                }

                Request::Deploy(deploy) => {
                    let key = deploy.key.clone();
                    let ctx = next.run(ctx).await?;
                    self.invalidate(split_key(&key));
                    if let Some(value) = &ctx.response.data {
                        self.entries.insert(key.clone(), value.clone());
                        self.observers.notify(&Notification::Value {
                            key: key.clone(),
                            value: value.clone(),
                        });
                    }
                    debug!(%key, stored = ctx.response.data.is_some(), "cache refreshed after deploy");
                    Ok(ctx)
                }
            }
        })
    }
}
