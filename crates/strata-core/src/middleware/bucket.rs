// Bucket layer: buffers write actions until they are deployed.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::action::Action;
use crate::config::{nested_segment, split_key};
use crate::context::{Context, Request};
use crate::error::CoreError;
use crate::mutate;
use crate::pipeline::{LayerFuture, Middleware, Next};

/// Pending (written but not deployed) actions, keyed by domain key.
///
/// - Write: append under the action's domain, expose the domain's list
///   in `response.pending`, continue. If the rest of the stack rejects
///   the write the action is discarded.
/// - Fetch: continue, then fold the pending actions that apply to the
///   fetched key onto `response.data`.
/// - Deploy: drain the domain (or, for a nested key or an id, only the
///   actions targeting that item) into `response.actions` and continue;
///   a failed deploy puts the actions back. Nothing pending
///   short-circuits the run.
#[derive(Debug, Default)]
pub struct Bucket {
    pending: DashMap<String, Vec<Action>>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the pending actions that apply to `key`.
    pub fn pending(&self, key: &str) -> Vec<Action> {
        self.pending
            .get(split_key(key))
            .map(|actions| {
                actions
                    .iter()
                    .filter(|a| a.applies_to(key))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push(&self, action: Action) -> Vec<Action> {
        let mut entry = self.pending.entry(action.domain().to_owned()).or_default();
        entry.push(action);
        entry.clone()
    }

    fn discard(&self, action: &Action) {
        if let Some(mut entry) = self.pending.get_mut(action.domain()) {
            if let Some(pos) = entry.iter().rposition(|a| a == action) {
                entry.remove(pos);
            }
        }
        self.pending.remove_if(action.domain(), |_, v| v.is_empty());
    }

    fn drain(&self, key: &str, id: Option<&str>) -> Vec<Action> {
        let domain = split_key(key);
        let target = nested_segment(key).or(id);
        let drained = match self.pending.get_mut(domain) {
            Some(mut entry) => {
                let all = std::mem::take(entry.value_mut());
                match target {
                    None => all,
                    Some(target) => {
                        let (hit, keep): (Vec<_>, Vec<_>) = all
                            .into_iter()
                            .partition(|a| a.target_id() == Some(target));
                        *entry.value_mut() = keep;
                        hit
                    }
                }
            }
            None => Vec::new(),
        };
        self.pending.remove_if(domain, |_, v| v.is_empty());
        drained
    }

    fn restore(&self, key: &str, mut actions: Vec<Action>) {
        let mut entry = self.pending.entry(split_key(key).to_owned()).or_default();
        actions.append(entry.value_mut());
        *entry.value_mut() = actions;
    }
}

/// Fold `pending` onto the value fetched for `key` with the caller's
/// projection, or the default one.
fn project(
    key: &str,
    base: Value,
    pending: &[Action],
    custom: Option<&crate::context::Mutate>,
) -> Result<Value, CoreError> {
    match custom {
        Some(f) => pending.iter().try_fold(base, |acc, action| f(&acc, action)),
        None => mutate::project(key, &base, pending),
    }
}

impl Middleware for Bucket {
    fn name(&self) -> &'static str {
        "bucket"
    }

    fn handle<'a>(&'a self, mut ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            match ctx.request() {
                Request::Write(write) => {
                    let action = write.action.clone();
                    ctx.response.pending = self.push(action.clone());
                    debug!(key = action.key(), kind = %action.kind, pending = ctx.response.pending.len(), "action buffered");
                    match next.run(ctx).await {
                        Ok(ctx) => Ok(ctx),
                        Err(e) => {
                            self.discard(&action);
                            Err(e)
                        }
                    }
                }

                Request::Fetch(_) => {
                    let key = ctx.key().to_owned();
                    let mut ctx = next.run(ctx).await?;
                    let pending = self.pending(&key);
                    if !pending.is_empty() {
                        let base = ctx.response.data.take().unwrap_or(Value::Null);
                        let projected =
                            project(&key, base, &pending, ctx.response.mutate.as_ref())?;
                        debug!(%key, pending = pending.len(), "pending actions folded");
                        ctx.response.data = Some(projected);
                    }
                    Ok(ctx)
                }

                Request::Deploy(deploy) => {
                    let key = deploy.key.clone();
                    let drained = self.drain(&key, deploy.id.as_deref());
                    if drained.is_empty() {
                        debug!(%key, "nothing pending, deploy skipped");
                        return Ok(ctx);
                    }
                    ctx.response.actions.clone_from(&drained);
                    match next.run(ctx).await {
                        Ok(ctx) => Ok(ctx),
                        Err(e) => {
                            debug!(%key, restored = drained.len(), "deploy failed, actions restored");
                            self.restore(&key, drained);
                            Err(e)
                        }
                    }
                }

                Request::Subscribe(_) => next.run(ctx).await,
            }
        })
    }
}
