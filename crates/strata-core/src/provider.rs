// ── Provider facade ──
//
// Owns the active middleware stack and exposes the four caller-facing
// operations. The stack is rebuilt only when the schema key set changes;
// every operation captures the stack that is current at call time.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::action::Action;
use crate::config::PipelineConfig;
use crate::context::{Context, DeployRequest, FetchRequest, Mutate, Query, Request, Response};
use crate::error::CoreError;
use crate::middleware::{Bucket, Cache, EndpointMiddleware, Store};
use crate::pipeline::App;
use crate::subscription::{Observer, SubjectType, Subscription};

/// Invoked once after every successful write.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

// ── Stack construction ───────────────────────────────────────────────

/// Builds a fresh [`App`] from a configuration.
pub trait StackFactory: Send + Sync {
    fn build(&self, config: &PipelineConfig) -> Result<App, CoreError>;
}

impl<F> StackFactory for F
where
    F: Fn(&PipelineConfig) -> Result<App, CoreError> + Send + Sync,
{
    fn build(&self, config: &PipelineConfig) -> Result<App, CoreError> {
        self(config)
    }
}

/// `Store → Bucket → Cache → EndpointMiddleware`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStack;

impl StackFactory for DefaultStack {
    fn build(&self, config: &PipelineConfig) -> Result<App, CoreError> {
        Ok(App::new()
            .use_layer(Store::new())
            .use_layer(Bucket::new())
            .use_layer(Cache::new())
            .use_layer(EndpointMiddleware::new(config.clone())?))
    }
}

// ── State ────────────────────────────────────────────────────────────

/// The stack in use together with the key set it was built for.
#[derive(Debug)]
pub struct ActiveStack {
    pub keys: BTreeSet<String>,
    pub app: Arc<App>,
}

#[derive(Debug)]
pub enum PipelineState {
    Uninitialized,
    Active(ActiveStack),
}

// ── Provider ─────────────────────────────────────────────────────────

struct ProviderInner {
    state: ArcSwap<PipelineState>,
    factory: Arc<dyn StackFactory>,
    on_change: Option<ChangeCallback>,
    in_flight: watch::Sender<usize>,
}

/// Entry point for callers.
///
/// Holds the active stack behind an atomic swap. Use
/// [`handle()`](Self::handle) to give other tasks access to the
/// operations without handing out the provider itself.
pub struct Provider {
    handle: ProviderHandle,
}

pub struct ProviderBuilder {
    config: PipelineConfig,
    factory: Arc<dyn StackFactory>,
    on_change: Option<ChangeCallback>,
}

impl ProviderBuilder {
    /// Replace the default four-layer stack.
    pub fn factory(mut self, factory: impl StackFactory + 'static) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    pub fn on_data_change(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    /// Build the provider and its first stack. Configuration errors
    /// surface here.
    pub fn build(self) -> Result<Provider, CoreError> {
        let (in_flight, _) = watch::channel(0);
        let provider = Provider {
            handle: ProviderHandle {
                inner: Arc::new(ProviderInner {
                    state: ArcSwap::from_pointee(PipelineState::Uninitialized),
                    factory: self.factory,
                    on_change: self.on_change,
                    in_flight,
                }),
            },
        };
        provider.update_config(self.config)?;
        Ok(provider)
    }
}

impl Provider {
    pub fn new(config: PipelineConfig) -> Result<Self, CoreError> {
        Self::builder(config).build()
    }

    pub fn builder(config: PipelineConfig) -> ProviderBuilder {
        ProviderBuilder {
            config,
            factory: Arc::new(DefaultStack),
            on_change: None,
        }
    }

    /// Apply a new configuration.
    ///
    /// Rebuilds the stack only if the schema key set differs from the
    /// active one; returns whether it did. On error the previous stack
    /// stays in place.
    pub fn update_config(&self, config: PipelineConfig) -> Result<bool, CoreError> {
        let inner = &self.handle.inner;
        let keys = config.schema_keys();
        let unchanged = matches!(
            inner.state.load().as_ref(),
            PipelineState::Active(active) if active.keys == keys
        );
        if unchanged {
            debug!(keys = ?keys, "schema keys unchanged, keeping stack");
            return Ok(false);
        }

        config.validate()?;
        let app = inner.factory.build(&config)?;
        info!(keys = ?keys, layers = ?app.layer_names(), "pipeline stack built");
        inner.state.store(Arc::new(PipelineState::Active(ActiveStack {
            keys,
            app: Arc::new(app),
        })));
        Ok(true)
    }

    pub fn handle(&self) -> ProviderHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> Arc<PipelineState> {
        self.handle.inner.state.load_full()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state().as_ref(), PipelineState::Active(_))
    }

    pub fn schema_keys(&self) -> BTreeSet<String> {
        match self.state().as_ref() {
            PipelineState::Active(active) => active.keys.clone(),
            PipelineState::Uninitialized => BTreeSet::new(),
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.handle.is_fetching()
    }

    /// Watch the number of runs in flight.
    pub fn fetching(&self) -> watch::Receiver<usize> {
        self.handle.inner.in_flight.subscribe()
    }

    pub fn fetch(
        &self,
        key: impl Into<String>,
        component_id: impl Into<String>,
        query: Query,
        mutate: Option<Mutate>,
    ) -> BoxFuture<'static, Result<Context, CoreError>> {
        self.handle.fetch(key, component_id, query, mutate)
    }

    pub fn subscribe(
        &self,
        key: impl Into<String>,
        component_id: impl Into<String>,
        subject_type: SubjectType,
        observer: Observer,
    ) -> BoxFuture<'static, Result<Subscription, CoreError>> {
        self.handle.subscribe(key, component_id, subject_type, observer)
    }

    pub fn request(&self, action: Action) -> Option<BoxFuture<'static, Result<(), CoreError>>> {
        self.handle.request(action)
    }

    pub fn deploy(
        &self,
        key: impl Into<String>,
        id: Option<String>,
    ) -> BoxFuture<'static, Result<Context, CoreError>> {
        self.handle.deploy(key, id)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("state", &self.state())
            .field("in_flight", &*self.handle.inner.in_flight.borrow())
            .finish()
    }
}

// ── Handle ───────────────────────────────────────────────────────────

/// Cheap, cloneable access to the provider's operations.
///
/// Always dispatches against the provider's current stack, so a handle
/// taken before a rebuild keeps working after it.
#[derive(Clone)]
pub struct ProviderHandle {
    inner: Arc<ProviderInner>,
}

/// Counts one run as in flight until dropped.
struct InFlight(Arc<ProviderInner>);

impl InFlight {
    fn enter(inner: &Arc<ProviderInner>) -> Self {
        inner.in_flight.send_modify(|n| *n += 1);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl ProviderHandle {
    pub fn is_fetching(&self) -> bool {
        *self.inner.in_flight.borrow() > 0
    }

    fn current(&self) -> Result<Arc<App>, CoreError> {
        match self.inner.state.load().as_ref() {
            PipelineState::Active(active) => Ok(Arc::clone(&active.app)),
            PipelineState::Uninitialized => Err(CoreError::Uninitialized),
        }
    }

    /// Capture the current stack now and run `ctx` through it later.
    fn run(&self, ctx: Context) -> BoxFuture<'static, Result<Context, CoreError>> {
        let app = self.current();
        let guard = InFlight::enter(&self.inner);
        Box::pin(async move {
            let _guard = guard;
            app?.handle_change(ctx).await
        })
    }

    pub fn fetch(
        &self,
        key: impl Into<String>,
        component_id: impl Into<String>,
        query: Query,
        mutate: Option<Mutate>,
    ) -> BoxFuture<'static, Result<Context, CoreError>> {
        let request = Request::Fetch(FetchRequest {
            key: key.into(),
            component_id: component_id.into(),
            query,
        });
        let response = Response {
            mutate,
            ..Response::default()
        };
        self.run(Context::with_response(request, response))
    }

    pub fn subscribe(
        &self,
        key: impl Into<String>,
        component_id: impl Into<String>,
        subject_type: SubjectType,
        observer: Observer,
    ) -> BoxFuture<'static, Result<Subscription, CoreError>> {
        let key = key.into();
        let run = self.run(Context::subscribe(
            key.clone(),
            component_id,
            subject_type,
            observer,
        ));
        Box::pin(async move {
            let mut ctx = run.await?;
            ctx.response
                .subscription
                .take()
                .ok_or(CoreError::Unhandled {
                    kind: "subscribe",
                    key,
                })
        })
    }

    /// Run a write. A `NOOP` action is absorbed: no run is started and
    /// `None` is returned.
    pub fn request(&self, action: Action) -> Option<BoxFuture<'static, Result<(), CoreError>>> {
        if action.is_noop() {
            debug!("noop action absorbed");
            return None;
        }
        let run = self.run(Context::write(action));
        let on_change = self.inner.on_change.clone();
        Some(Box::pin(async move {
            run.await?;
            if let Some(callback) = on_change {
                callback();
            }
            Ok(())
        }))
    }

    pub fn deploy(
        &self,
        key: impl Into<String>,
        id: Option<String>,
    ) -> BoxFuture<'static, Result<Context, CoreError>> {
        self.run(Context::new(Request::Deploy(DeployRequest {
            key: key.into(),
            id,
        })))
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("fetching", &self.is_fetching())
            .finish_non_exhaustive()
    }
}
