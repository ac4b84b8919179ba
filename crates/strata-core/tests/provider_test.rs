// End-to-end behaviour of `Provider` over the default stack and over
// custom stacks built through a factory.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{self, BoxFuture};
use serde_json::{Value, json};
use tokio::sync::watch;

use strata_core::{
    Action, App, Context, CoreError, Endpoint, LayerFuture, MemoryEndpoint, Middleware, Next,
    Notification, Observer, PipelineConfig, Provider, Query, Shape, Source, SubjectType,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn schema(keys: &[&str]) -> PipelineConfig {
    keys.iter()
        .fold(PipelineConfig::default(), |c, k| c.with_shape(*k, Shape::array()))
}

fn with_memory(keys: &[&str], memory: &Arc<MemoryEndpoint>) -> PipelineConfig {
    keys.iter().fold(schema(keys), |c, k| {
        c.with_endpoint(*k, Arc::clone(memory) as Arc<dyn Endpoint>)
    })
}

fn seeded() -> Arc<MemoryEndpoint> {
    Arc::new(MemoryEndpoint::new().with_value(
        "users",
        json!([{"id": "1", "name": "Ada"}, {"id": "2", "name": "Alan"}]),
    ))
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook = Arc::clone(&count);
    (count, move || {
        hook.fetch_add(1, Ordering::SeqCst);
    })
}

/// Endpoint that can be switched into a failing state.
#[derive(Default)]
struct Flaky {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl Endpoint for Flaky {
    fn kind(&self) -> &'static str {
        "flaky"
    }

    fn fetch<'a>(&'a self, key: &'a str, _query: &'a Query) -> BoxFuture<'a, Result<Value, CoreError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.down.load(Ordering::SeqCst) {
            Err(CoreError::Endpoint {
                key: key.to_owned(),
                message: "unavailable".into(),
                status: Some(503),
            })
        } else {
            Ok(json!(["fresh"]))
        };
        Box::pin(future::ready(result))
    }

    fn deploy<'a>(
        &'a self,
        _key: &'a str,
        _id: Option<&'a str>,
        _actions: &'a [Action],
    ) -> BoxFuture<'a, Result<Option<Value>, CoreError>> {
        Box::pin(future::ready(Ok(None)))
    }
}

/// Holds every run until the gate opens.
struct Gate(watch::Receiver<bool>);

impl Middleware for Gate {
    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            let mut open = self.0.clone();
            open.wait_for(|open| *open)
                .await
                .map(|_| ())
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            next.run(ctx).await
        })
    }
}

/// Answers every request with a fixed tag.
struct Tag(usize);

impl Middleware for Tag {
    fn handle<'a>(&'a self, mut ctx: Context, _next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            ctx.response.data = Some(json!(self.0));
            Ok(ctx)
        })
    }
}

/// Records the id of every context it sees.
struct Probe(Arc<Mutex<Vec<String>>>);

impl Middleware for Probe {
    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        self.0.lock().unwrap().push(ctx.id().to_string());
        next.run(ctx)
    }
}

// ── Stack lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn test_in_flight_run_keeps_its_stack() {
    let (open_tx, open_rx) = watch::channel(false);
    let gate: Arc<dyn Middleware> = Arc::new(Gate(open_rx));
    let provider = Provider::builder(schema(&["users"]))
        .factory(move |config: &PipelineConfig| -> Result<App, CoreError> {
            Ok(App::new()
                .use_shared(Arc::clone(&gate))
                .use_layer(Tag(config.schema.len())))
        })
        .build()
        .unwrap();

    let in_flight = tokio::spawn(provider.fetch("users", "view", Query::new(), None));
    tokio::task::yield_now().await;
    assert!(provider.is_fetching());

    assert!(provider.update_config(schema(&["users", "posts"])).unwrap());
    open_tx.send(true).unwrap();

    let old = in_flight.await.unwrap().unwrap();
    assert_eq!(old.response.data, Some(json!(1)));

    let new = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(new.response.data, Some(json!(2)));
    assert!(!provider.is_fetching());
}

#[tokio::test]
async fn test_schema_growth_rebuilds_stack() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    provider.fetch("users", "view", Query::new(), None).await.unwrap();
    let err = provider
        .fetch("posts", "view", Query::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownKey { .. }));

    assert!(provider.update_config(with_memory(&["users", "posts"], &memory)).unwrap());

    let posts = provider.fetch("posts", "view", Query::new(), None).await.unwrap();
    assert_eq!(posts.response.data, Some(json!([])));

    // Fresh stack, fresh cache.
    let users = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(users.response.source, Some(Source::Remote));
    assert_eq!(memory.fetch_count(), 3);
}

#[tokio::test]
async fn test_same_keys_keep_cache() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();
    provider.fetch("users", "view", Query::new(), None).await.unwrap();

    assert!(!provider.update_config(with_memory(&["users"], &memory)).unwrap());

    let again = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(again.response.source, Some(Source::Cache));
}

#[tokio::test]
async fn test_handle_follows_rebuilds() {
    let provider = Provider::new(schema(&["users"])).unwrap();
    let handle = provider.handle();

    provider.update_config(schema(&["users", "posts"])).unwrap();

    let posts = handle.fetch("posts", "view", Query::new(), None).await.unwrap();
    assert_eq!(posts.response.source, Some(Source::Default));
}

#[tokio::test]
async fn test_one_context_per_call() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probes = Arc::clone(&seen);
    let provider = Provider::builder(schema(&["users"]))
        .factory(move |_: &PipelineConfig| -> Result<App, CoreError> {
            Ok(App::new()
                .use_layer(Probe(Arc::clone(&probes)))
                .use_layer(Probe(Arc::clone(&probes))))
        })
        .build()
        .unwrap();

    provider.fetch("users", "view", Query::new(), None).await.unwrap();
    provider.deploy("users", None).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], seen[1]);
    assert_eq!(seen[2], seen[3]);
    assert_ne!(seen[0], seen[2]);
}

// ── Reads ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_cache_hit_skips_endpoint() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    let first = provider.fetch("users", "list", Query::new(), None).await.unwrap();
    let second = provider.fetch("users", "detail", Query::new(), None).await.unwrap();

    assert_eq!(first.response.source, Some(Source::Remote));
    assert_eq!(second.response.source, Some(Source::Cache));
    assert_eq!(first.response.data, second.response.data);
    assert_eq!(memory.fetch_count(), 1);
}

#[tokio::test]
async fn test_nested_key_cached_and_written() {
    let memory = seeded();
    let (changes, hook) = counter();
    let provider = Provider::builder(with_memory(&["users"], &memory))
        .on_data_change(hook)
        .build()
        .unwrap();

    let miss = provider.fetch("users/1", "detail", Query::new(), None).await.unwrap();
    let hit = provider.fetch("users/1", "detail", Query::new(), None).await.unwrap();
    assert_eq!(miss.response.source, Some(Source::Remote));
    assert_eq!(hit.response.source, Some(Source::Cache));
    assert_eq!(hit.response.data, Some(json!({"id": "1", "name": "Ada"})));
    assert_eq!(memory.fetch_count(), 1);

    provider
        .request(Action::update("users/1", json!({"name": "Ada L."})))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(changes.load(Ordering::SeqCst), 1);

    let read = provider.fetch("users/1", "detail", Query::new(), None).await.unwrap();
    assert_eq!(read.response.data, Some(json!({"id": "1", "name": "Ada L."})));
}

#[tokio::test]
async fn test_endpoint_failure_is_not_cached() {
    let flaky = Arc::new(Flaky::default());
    flaky.down.store(true, Ordering::SeqCst);
    let provider = Provider::new(
        schema(&["users"]).with_endpoint("users", Arc::clone(&flaky) as Arc<dyn Endpoint>),
    )
    .unwrap();

    let err = provider
        .fetch("users", "view", Query::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Endpoint { status: Some(503), .. }));

    flaky.down.store(false, Ordering::SeqCst);
    let ok = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(ok.response.source, Some(Source::Remote));
    assert_eq!(ok.response.data, Some(json!(["fresh"])));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fetch_revision_tracks_writes() {
    let provider = Provider::new(schema(&["users"])).unwrap();
    let before = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(before.response.revision, Some(0));

    provider
        .request(Action::create("users", json!({"id": "9"})))
        .unwrap()
        .await
        .unwrap();

    let after = provider.fetch("users", "view", Query::new(), None).await.unwrap();
    assert_eq!(after.response.revision, Some(1));
    assert_eq!(after.response.data, Some(json!([{"id": "9"}])));
}

// ── Writes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_noop_write_is_absorbed() {
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&runs);
    let (changes, hook) = counter();
    let provider = Provider::builder(schema(&["users"]))
        .factory(move |_: &PipelineConfig| -> Result<App, CoreError> {
            let seen = Arc::clone(&seen);
            Ok(App::new().use_layer(Counting(seen)))
        })
        .on_data_change(hook)
        .build()
        .unwrap();

    assert!(provider.request(Action::noop()).is_none());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(changes.load(Ordering::SeqCst), 0);

    provider
        .request(Action::update("users", json!([])))
        .unwrap()
        .await
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(changes.load(Ordering::SeqCst), 1);
}

struct Counting(Arc<AtomicUsize>);

impl Middleware for Counting {
    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        self.0.fetch_add(1, Ordering::SeqCst);
        next.run(ctx)
    }
}

#[tokio::test]
async fn test_update_notifies_once() {
    let memory = seeded();
    let (changes, hook) = counter();
    let provider = Provider::builder(with_memory(&["users"], &memory))
        .on_data_change(hook)
        .build()
        .unwrap();
    provider.fetch("users", "list", Query::new(), None).await.unwrap();

    let (observer, mut rx) = Observer::channel();
    let _sub = provider
        .subscribe("users", "list", SubjectType::Value, observer)
        .await
        .unwrap();

    provider
        .request(Action::update("users", json!({"name": "Grace"})).with_id("2"))
        .unwrap()
        .await
        .unwrap();

    assert_eq!(changes.load(Ordering::SeqCst), 1);
    let expected = json!([{"id": "1", "name": "Ada"}, {"id": "2", "name": "Grace"}]);
    assert_eq!(
        rx.try_recv().ok(),
        Some(Notification::Value {
            key: "users".into(),
            value: expected.clone(),
        })
    );
    assert!(rx.try_recv().is_err());

    let read = provider.fetch("users", "list", Query::new(), None).await.unwrap();
    assert_eq!(read.response.data, Some(expected));
    assert_eq!(memory.deploy_count(), 0);
}

#[tokio::test]
async fn test_rejected_write_skips_callback() {
    let (changes, hook) = counter();
    let provider = Provider::builder(schema(&["users"]))
        .on_data_change(hook)
        .build()
        .unwrap();

    let err = provider
        .request(Action::update("posts", json!({})))
        .unwrap()
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::UnknownKey { .. }));
    assert_eq!(changes.load(Ordering::SeqCst), 0);
}

// ── Subscriptions ───────────────────────────────────────────────────

#[tokio::test]
async fn test_action_subscribers_see_nested_writes() {
    let provider = Provider::new(schema(&["users"])).unwrap();
    let (observer, mut rx) = Observer::channel();
    let sub = provider
        .subscribe("users", "log", SubjectType::Action, observer)
        .await
        .unwrap();
    assert!(sub.is_active());

    let action = Action::update("users/1", json!({"name": "Ada"}));
    provider.request(action.clone()).unwrap().await.unwrap();
    assert!(matches!(
        rx.try_recv(),
        Ok(Notification::Action { key, action: got }) if key == "users" && got == action
    ));

    sub.unsubscribe();
    provider
        .request(Action::update("users/1", json!({})))
        .unwrap()
        .await
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_subscribe_to_unknown_key_fails() {
    let provider = Provider::new(schema(&["users"])).unwrap();
    let (observer, _rx) = Observer::channel();
    let err = provider
        .subscribe("posts", "view", SubjectType::Value, observer)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "unknown_key");
}

#[tokio::test]
async fn test_subscribe_without_cache_layer_is_unhandled() {
    let provider = Provider::builder(schema(&["users"]))
        .factory(|_: &PipelineConfig| -> Result<App, CoreError> { Ok(App::new()) })
        .build()
        .unwrap();
    let (observer, _rx) = Observer::channel();
    let err = provider
        .subscribe("users", "view", SubjectType::Value, observer)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Unhandled { kind: "subscribe", .. }));
}

#[tokio::test]
async fn test_old_subscriptions_go_inactive_after_rebuild() {
    let provider = Provider::new(schema(&["users"])).unwrap();
    let (observer, _rx) = Observer::channel();
    let sub = provider
        .subscribe("users", "view", SubjectType::Value, observer)
        .await
        .unwrap();

    provider.update_config(schema(&["users", "posts"])).unwrap();
    assert!(!sub.is_active());
}

// ── Deploys ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_deploy_commits_pending_writes() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    provider
        .request(Action::delete("users", "1"))
        .unwrap()
        .await
        .unwrap();
    provider
        .request(Action::create("users", json!({"id": "3", "name": "Edsger"})))
        .unwrap()
        .await
        .unwrap();

    let out = provider.deploy("users", None).await.unwrap();
    assert_eq!(out.response.actions.len(), 2);
    assert_eq!(out.response.revision, Some(3));

    let committed = json!([{"id": "2", "name": "Alan"}, {"id": "3", "name": "Edsger"}]);
    assert_eq!(memory.value("users"), Some(committed.clone()));

    let read = provider.fetch("users", "list", Query::new(), None).await.unwrap();
    assert_eq!(read.response.source, Some(Source::Cache));
    assert_eq!(read.response.data, Some(committed));
    assert_eq!(memory.fetch_count(), 0);
}

#[tokio::test]
async fn test_nested_write_deploys_with_its_domain() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    provider
        .request(Action::update("users/1", json!({"name": "Z"})))
        .unwrap()
        .await
        .unwrap();

    let list = provider.fetch("users", "list", Query::new(), None).await.unwrap();
    assert_eq!(
        list.response.data,
        Some(json!([{"id": "1", "name": "Z"}, {"id": "2", "name": "Alan"}]))
    );

    let out = provider.deploy("users", None).await.unwrap();
    assert_eq!(
        out.response.actions,
        vec![Action::update("users/1", json!({"name": "Z"}))]
    );

    let committed = json!([{"id": "1", "name": "Z"}, {"id": "2", "name": "Alan"}]);
    assert_eq!(memory.value("users"), Some(committed.clone()));
    assert_eq!(memory.value("users/1"), None);

    let read = provider.fetch("users", "list", Query::new(), None).await.unwrap();
    assert_eq!(read.response.data, Some(committed));
    let item = provider.fetch("users/1", "detail", Query::new(), None).await.unwrap();
    assert_eq!(item.response.data, Some(json!({"id": "1", "name": "Z"})));
}

#[tokio::test]
async fn test_item_deploy_leaves_other_items_pending() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    for (key, name) in [("users/1", "Z"), ("users/2", "Y")] {
        provider
            .request(Action::update(key, json!({"name": name})))
            .unwrap()
            .await
            .unwrap();
    }

    let out = provider.deploy("users/2", None).await.unwrap();
    assert_eq!(out.response.actions.len(), 1);
    assert_eq!(
        memory.value("users"),
        Some(json!([{"id": "1", "name": "Ada"}, {"id": "2", "name": "Y"}]))
    );

    let rest = provider.deploy("users", Some("1".into())).await.unwrap();
    assert_eq!(rest.response.actions.len(), 1);
    assert_eq!(
        memory.value("users"),
        Some(json!([{"id": "1", "name": "Z"}, {"id": "2", "name": "Y"}]))
    );
}

#[tokio::test]
async fn test_deploy_with_nothing_pending_is_quiet() {
    let memory = seeded();
    let provider = Provider::new(with_memory(&["users"], &memory)).unwrap();

    let out = provider.deploy("users", Some("1".into())).await.unwrap();
    assert!(out.response.actions.is_empty());
    assert_eq!(memory.deploy_count(), 0);
}
