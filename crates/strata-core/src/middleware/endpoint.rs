// Endpoint layer: the innermost layer, talks to whatever holds the data.

use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, Shape, split_key};
use crate::context::{Context, Request, Source};
use crate::error::CoreError;
use crate::pipeline::{LayerFuture, Middleware, Next};

/// Resolves a data key against the schema and the endpoint mapping.
///
/// Every request for a key outside the schema fails with
/// `CoreError::UnknownKey`. Writes never leave the process here; they
/// reach the endpoint when deployed.
#[derive(Debug)]
pub struct EndpointMiddleware {
    config: PipelineConfig,
}

impl EndpointMiddleware {
    pub fn new(config: PipelineConfig) -> Result<Self, CoreError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn shape(&self, key: &str) -> Result<&Shape, CoreError> {
        self.config
            .shape(key)
            .ok_or_else(|| CoreError::unknown_key(key))
    }
}

impl Middleware for EndpointMiddleware {
    fn name(&self) -> &'static str {
        "endpoint"
    }

    fn handle<'a>(&'a self, mut ctx: Context, next: Next<'a>) -> LayerFuture<'a> {
        Box::pin(async move {
            let key = ctx.key().to_owned();
            let shape = self.shape(&key)?;
            let endpoint = self.config.endpoint(&key);

            match ctx.request() {
                Request::Fetch(fetch) => {
                    let query = fetch.query.clone();
                    if let Some(endpoint) = endpoint {
                        let value = endpoint.fetch(&key, &query).await?;
                        // Null on a domain key means "never written".
                        let value = if value.is_null() && split_key(&key) == key {
                            shape.empty_value()
                        } else {
                            value
                        };
                        debug!(%key, endpoint = endpoint.kind(), "fetched from endpoint");
                        ctx.response.data = Some(value);
                        ctx.response.source = Some(Source::Remote);
                    } else {
                        debug!(%key, "no endpoint mapped, serving shape default");
                        ctx.response.data = Some(shape.empty_value());
                        ctx.response.source = Some(Source::Default);
                    }
                }

                Request::Deploy(deploy) => {
                    let id = deploy.id.clone();
                    if let Some(endpoint) = endpoint {
                        let committed = endpoint
                            .deploy(&key, id.as_deref(), &ctx.response.actions)
                            .await?;
                        info!(
                            %key,
                            endpoint = endpoint.kind(),
                            actions = ctx.response.actions.len(),
                            "deployed"
                        );
                        ctx.response.data = committed;
                    } else {
                        warn!(
                            %key,
                            actions = ctx.response.actions.len(),
                            "no endpoint mapped, deployed actions are dropped"
                        );
                    }
                }

                Request::Write(_) | Request::Subscribe(_) => {}
            }

            next.run(ctx).await
        })
    }
}
