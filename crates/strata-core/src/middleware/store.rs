// Store layer: per-domain write ordering and revision counters.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::split_key;
use crate::context::{Context, RequestKind};
use crate::pipeline::{LayerFuture, Middleware, Next};

/// Serializes writes and deploys per domain key and stamps every
/// response with the domain's revision.
///
/// The revision advances after each successful write, and after each
/// deploy that shipped at least one action.
#[derive(Debug, Default)]
pub struct Store {
    locks: DashMap<String, Arc<Mutex<()>>>,
    revisions: DashMap<String, u64>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision of the domain `key` belongs to (0 if untouched).
    pub fn revision(&self, key: &str) -> u64 {
        self.revisions.get(split_key(key)).map_or(0, |r| *r)
    }

    fn lock_for(&self, domain: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(domain.to_owned()).or_default().value())
    }

    fn bump(&self, domain: &str) -> u64 {
        let mut revision = self.revisions.entry(domain.to_owned()).or_insert(0);
        *revision += 1;
        *revision
    }
}

impl Middleware for Store {
    fn name(&self) -> &'static str {
        "store"
    }

    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            let domain = split_key(ctx.key()).to_owned();
            let kind = ctx.kind();
            match kind {
                RequestKind::Write | RequestKind::Deploy => {
                    let _turn = self.lock_for(&domain).lock_owned().await;
                    let mut ctx = next.run(ctx).await?;
                    let changed = kind == RequestKind::Write || !ctx.response.actions.is_empty();
                    let revision = if changed {
                        self.bump(&domain)
                    } else {
                        self.revision(&domain)
                    };
                    debug!(%domain, request = %kind, revision, "store revision");
                    ctx.response.revision = Some(revision);
                    Ok(ctx)
                }
                RequestKind::Fetch | RequestKind::Subscribe => {
                    let mut ctx = next.run(ctx).await?;
                    ctx.response.revision = Some(self.revision(&domain));
                    Ok(ctx)
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::action::Action;
    use crate::context::Query;
    use crate::error::CoreError;
    use crate::pipeline::App;

    /// Records how many writes are inside the layer at once.
    #[derive(Default)]
    struct Overlap {
        inside: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl Middleware for Overlap {
        fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
            use std::sync::atomic::Ordering;
            Box::pin(async move {
                let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                self.inside.fetch_sub(1, Ordering::SeqCst);
                next.run(ctx).await
            })
        }
    }

    struct Reject;

    impl Middleware for Reject {
        fn handle<'a>(&'a self, _ctx: Context, _next: Next<'a>) -> LayerFuture<'a> {
            Box::pin(async { Err(CoreError::Internal("rejected".into())) })
        }
    }

    #[tokio::test]
    async fn writes_bump_the_domain_revision() {
        let app = App::new().use_layer(Store::new());

        let first = app
            .handle_change(Context::write(Action::update("users/1", json!({}))))
            .await
            .unwrap();
        let second = app
            .handle_change(Context::write(Action::update("users", json!([]))))
            .await
            .unwrap();
        assert_eq!(first.response.revision, Some(1));
        assert_eq!(second.response.revision, Some(2));

        let read = app
            .handle_change(Context::fetch("users", "c1", Query::new()))
            .await
            .unwrap();
        assert_eq!(read.response.revision, Some(2));
    }

    #[tokio::test]
    async fn empty_deploy_keeps_revision() {
        let app = App::new().use_layer(Store::new());
        let out = app.handle_change(Context::deploy("users", None)).await.unwrap();
        assert_eq!(out.response.revision, Some(0));
    }

    #[tokio::test]
    async fn failed_write_does_not_advance() {
        let store = Arc::new(Store::new());
        let app = App::new()
            .use_shared(Arc::clone(&store) as Arc<dyn Middleware>)
            .use_layer(Reject);

        let result = app
            .handle_change(Context::write(Action::update("users", json!([]))))
            .await;
        assert!(result.is_err());
        assert_eq!(store.revision("users"), 0);
    }

    #[tokio::test]
    async fn same_domain_writes_do_not_overlap() {
        let overlap = Arc::new(Overlap::default());
        let app = Arc::new(
            App::new()
                .use_layer(Store::new())
                .use_shared(Arc::clone(&overlap) as Arc<dyn Middleware>),
        );

        let runs: Vec<_> = (0..4)
            .map(|i| {
                let app = Arc::clone(&app);
                tokio::spawn(async move {
                    app.handle_change(Context::write(Action::update(
                        format!("users/{i}"),
                        json!({}),
                    )))
                    .await
                })
            })
            .collect();
        for run in runs {
            run.await.unwrap().unwrap();
        }

        assert_eq!(overlap.peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
