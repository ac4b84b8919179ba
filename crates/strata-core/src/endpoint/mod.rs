// ── Remote endpoints ──
//
// Where a domain's data actually lives. The endpoint layer resolves a
// data key to one of these and forwards fetches and deploys to it.

mod http;
mod memory;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::action::Action;
use crate::context::Query;
use crate::error::CoreError;

pub use http::{HttpEndpoint, HttpOptions};
pub use memory::MemoryEndpoint;

/// Remote access for one or more domain keys.
pub trait Endpoint: Send + Sync {
    /// Short label for logs and the CLI (`"http"`, `"memory"`).
    fn kind(&self) -> &'static str;

    /// Read the value stored under `key`. `Value::Null` means "nothing
    /// stored"; the endpoint layer substitutes the shape's empty value.
    fn fetch<'a>(&'a self, key: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Value, CoreError>>;

    /// Commit `actions` against `key`. Returns the committed value when
    /// the endpoint reports one.
    fn deploy<'a>(
        &'a self,
        key: &'a str,
        id: Option<&'a str>,
        actions: &'a [Action],
    ) -> BoxFuture<'a, Result<Option<Value>, CoreError>>;
}
