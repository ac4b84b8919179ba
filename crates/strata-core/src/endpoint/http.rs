// HTTP endpoint
//
// Wraps `reqwest::Client` with key-based URL construction and a bounded
// retry loop for transient failures. Routes:
//
//   GET  {base}/{key}?{query}      -> JSON value (empty body = null)
//   POST {base}/{key}/deploy       <- {"id": .., "actions": [..]}

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::Endpoint;
use crate::action::Action;
use crate::context::Query;
use crate::error::CoreError;

/// Transport tuning for [`HttpEndpoint`].
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub timeout: Duration,
    /// Extra attempts after a transient failure (0 = no retry).
    pub retries: u32,
    /// Base delay; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retries: 2,
            backoff: Duration::from_millis(200),
        }
    }
}

#[derive(Serialize)]
struct DeployBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    actions: &'a [Action],
}

#[derive(Debug)]
pub struct HttpEndpoint {
    http: reqwest::Client,
    base_url: Url,
    options: HttpOptions,
}

impl HttpEndpoint {
    pub fn new(base_url: Url, options: HttpOptions) -> Result<Self, CoreError> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("strata/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoreError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, base_url, options))
    }

    /// Use a pre-built client (shared connection pool, custom TLS, ...).
    pub fn with_client(http: reqwest::Client, mut base_url: Url, options: HttpOptions) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            http,
            base_url,
            options,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn key_url(&self, key: &str, suffix: Option<&str>) -> Result<Url, CoreError> {
        let mut path = key.trim_matches('/').to_owned();
        if let Some(suffix) = suffix {
            path.push('/');
            path.push_str(suffix);
        }
        self.base_url
            .join(&path)
            .map_err(|e| CoreError::config(format!("invalid endpoint path '{path}': {e}")))
    }

    async fn with_retry<T, F, Fut>(&self, key: &str, op: F) -> Result<T, CoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.options.retries => {
                    attempt += 1;
                    let delay = self.options.backoff * attempt;
                    warn!(%key, attempt, error = %e, ?delay, "transient endpoint failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn get(&self, key: &str, query: &Query) -> Result<Value, CoreError> {
        let url = self.key_url(key, None)?;
        debug!(%url, "GET");
        let params: Vec<(&str, &str)> = query.pairs().collect();
        let resp = self.http.get(url).query(&params).send().await?;
        let body = check_status(key, resp).await?.text().await?;
        parse_body(key, &body).map(Option::unwrap_or_default)
    }

    async fn post_deploy(
        &self,
        key: &str,
        id: Option<&str>,
        actions: &[Action],
    ) -> Result<Option<Value>, CoreError> {
        let url = self.key_url(key, Some("deploy"))?;
        debug!(%url, actions = actions.len(), "POST");
        let resp = self
            .http
            .post(url)
            .json(&DeployBody { id, actions })
            .send()
            .await?;
        let body = check_status(key, resp).await?.text().await?;
        parse_body(key, &body)
    }
}

impl Endpoint for HttpEndpoint {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn fetch<'a>(&'a self, key: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Value, CoreError>> {
        Box::pin(self.with_retry(key, move || self.get(key, query)))
    }

    fn deploy<'a>(
        &'a self,
        key: &'a str,
        id: Option<&'a str>,
        actions: &'a [Action],
    ) -> BoxFuture<'a, Result<Option<Value>, CoreError>> {
        Box::pin(self.with_retry(key, move || self.post_deploy(key, id, actions)))
    }
}

// ── Response helpers ─────────────────────────────────────────────────

/// Turn non-2xx responses into `CoreError::Endpoint`, keeping the body
/// as the message when there is one.
async fn check_status(key: &str, resp: reqwest::Response) -> Result<reqwest::Response, CoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(CoreError::Endpoint {
        key: key.to_owned(),
        message: if body.trim().is_empty() {
            status.to_string()
        } else {
            body
        },
        status: Some(status.as_u16()),
    })
}

fn parse_body(key: &str, body: &str) -> Result<Option<Value>, CoreError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| CoreError::Endpoint {
            key: key.to_owned(),
            message: format!("invalid JSON body: {e}"),
            status: None,
        })
}
