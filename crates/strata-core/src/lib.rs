// strata-core: Layered request pipeline between callers and remote data.
//
// A `Provider` owns an ordered stack of middleware (`Store`, `Bucket`,
// `Cache`, `EndpointMiddleware` by default) and runs one `Context` per
// caller operation through it.

pub mod action;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod middleware;
pub mod mutate;
pub mod pipeline;
pub mod provider;
pub mod subscription;

// ── Primary re-exports ──────────────────────────────────────────────
pub use action::{Action, ActionKind, ActionPayload};
pub use config::{PipelineConfig, Schema, Shape, ShapeKind, nested_segment, split_key};
pub use context::{Context, Mutate, Query, Request, RequestKind, Response, Source};
pub use endpoint::{Endpoint, HttpEndpoint, HttpOptions, MemoryEndpoint};
pub use error::CoreError;
pub use middleware::{Bucket, Cache, EndpointMiddleware, Store};
pub use pipeline::{App, LayerFuture, Middleware, Next};
pub use provider::{
    ActiveStack, ChangeCallback, DefaultStack, PipelineState, Provider, ProviderBuilder,
    ProviderHandle, StackFactory,
};
pub use subscription::{Notification, Observer, ObserverRegistry, SubjectType, Subscription};
