// Ordering, short-circuit and rejection behaviour of `App`.

use std::sync::{Arc, Mutex};

use serde_json::json;

use strata_core::{App, Context, CoreError, LayerFuture, Middleware, Next, Query};

// ── Helpers ─────────────────────────────────────────────────────────

type Trace = Arc<Mutex<Vec<String>>>;

/// Records "enter"/"leave" around the rest of the stack.
struct Probe {
    name: &'static str,
    trace: Trace,
}

impl Middleware for Probe {
    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            self.trace.lock().unwrap().push(format!("{}:enter", self.name));
            let result = next.run(ctx).await;
            self.trace.lock().unwrap().push(format!("{}:leave", self.name));
            result
        })
    }
}

/// Answers without calling `next`.
struct Answer {
    trace: Trace,
}

impl Middleware for Answer {
    fn handle<'a>(&'a self, mut ctx: Context, _next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            self.trace.lock().unwrap().push("answer".into());
            ctx.response.data = Some(json!("answered"));
            Ok(ctx)
        })
    }
}

struct Reject;

impl Middleware for Reject {
    fn handle<'a>(&'a self, _ctx: Context, _next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async { Err(CoreError::Internal("rejected".into())) })
    }
}

fn probe(name: &'static str, trace: &Trace) -> Probe {
    Probe {
        name,
        trace: Arc::clone(trace),
    }
}

fn fetch() -> Context {
    Context::fetch("users", "view", Query::new())
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_short_circuit_skips_later_layers() {
    let trace = Trace::default();
    let app = App::new()
        .use_layer(probe("a", &trace))
        .use_layer(Answer {
            trace: Arc::clone(&trace),
        })
        .use_layer(probe("never", &trace));

    let out = app.handle_change(fetch()).await.unwrap();

    assert_eq!(out.response.data, Some(json!("answered")));
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["a:enter", "answer", "a:leave"]
    );
}

#[tokio::test]
async fn test_layers_nest_in_insertion_order() {
    let trace = Trace::default();
    let app = App::new()
        .use_layer(probe("a", &trace))
        .use_layer(probe("b", &trace))
        .use_layer(probe("c", &trace));

    let ctx = fetch();
    let id = ctx.id();
    let out = app.handle_change(ctx).await.unwrap();

    assert_eq!(out.id(), id);
    assert_eq!(
        *trace.lock().unwrap(),
        vec!["a:enter", "b:enter", "c:enter", "c:leave", "b:leave", "a:leave"]
    );
}

#[tokio::test]
async fn test_rejection_stops_the_run() {
    let trace = Trace::default();
    let app = App::new()
        .use_layer(probe("a", &trace))
        .use_layer(Reject)
        .use_layer(probe("never", &trace));

    let err = app.handle_change(fetch()).await.unwrap_err();

    assert!(matches!(err, CoreError::Internal(ref m) if m == "rejected"));
    assert_eq!(*trace.lock().unwrap(), vec!["a:enter", "a:leave"]);
}

#[tokio::test]
async fn test_remaining_counts_down() {
    struct Depth(Arc<Mutex<Vec<usize>>>);

    impl Middleware for Depth {
        fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
            self.0.lock().unwrap().push(next.remaining());
            next.run(ctx)
        }
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = App::new()
        .use_layer(Depth(Arc::clone(&seen)))
        .use_layer(Depth(Arc::clone(&seen)));
    app.handle_change(fetch()).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 0]);
}
