// ── Pipeline runner ──
//
// `App` holds an ordered list of layers and drives one context through
// them. Each layer receives a `Next` bound to the rest of the stack; the
// `Next` past the last layer resolves with the context unchanged.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture};
use tracing::trace;

use crate::context::Context;
use crate::error::CoreError;

/// Future returned by a layer: resolves to the (possibly mutated) context.
pub type LayerFuture<'a> = BoxFuture<'a, Result<Context, CoreError>>;

/// A unit of the pipeline.
///
/// A layer may enrich `ctx.response` and call `next.run(ctx)`, skip
/// `next` entirely (short-circuit), or await `next.run(ctx)` and
/// post-process what comes back. Returning `Err` aborts the run; no
/// later layer executes.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn handle<'a>(&'a self, ctx: Context, next: Next<'a>) -> LayerFuture<'a>;
}

/// Continuation into the remainder of the stack.
pub struct Next<'a> {
    layers: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
    /// Invoke the next layer, or resolve with `ctx` if none remain.
    pub fn run(self, ctx: Context) -> LayerFuture<'a> {
        match self.layers.split_first() {
            Some((layer, rest)) => {
                trace!(
                    layer = layer.name(),
                    request = %ctx.kind(),
                    key = ctx.key(),
                    context = %ctx.id(),
                    "entering layer"
                );
                layer.handle(ctx, Next { layers: rest })
            }
            None => Box::pin(future::ready(Ok(ctx))),
        }
    }

    /// Number of layers still ahead of this continuation.
    pub fn remaining(&self) -> usize {
        self.layers.len()
    }
}

/// Ordered middleware stack plus the run entry point.
///
/// Holds nothing but its layer list; a fresh `App` is built whenever the
/// provider rebuilds its stack.
#[derive(Default)]
pub struct App {
    layers: Vec<Arc<dyn Middleware>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Append order is interception order.
    pub fn use_layer(mut self, layer: impl Middleware + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn use_shared(mut self, layer: Arc<dyn Middleware>) -> Self {
        self.layers.push(layer);
        self
    }

    /// Run `ctx` through every layer in order.
    pub async fn handle_change(&self, ctx: Context) -> Result<Context, CoreError> {
        let kind = ctx.kind();
        let id = ctx.id();
        let result = Next {
            layers: &self.layers,
        }
        .run(ctx)
        .await;
        match &result {
            Ok(_) => trace!(request = %kind, context = %id, "run complete"),
            Err(e) => trace!(request = %kind, context = %id, error = %e, "run failed"),
        }
        result
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("layers", &self.layer_names())
            .finish()
    }
}
