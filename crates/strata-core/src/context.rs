// ── Pipeline context ──
//
// The envelope threaded through every layer for one operation. The
// request is fixed at construction; the response is filled in as the
// context moves down (and back up) the stack.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::action::Action;
use crate::error::CoreError;
use crate::subscription::{Observer, SubjectType, Subscription};

/// Projects one action onto a value. Supplied by fetch callers; the
/// bucket layer falls back to [`crate::mutate::apply`].
pub type Mutate = Arc<dyn Fn(&Value, &Action) -> Result<Value, CoreError> + Send + Sync>;

/// Query parameters attached to a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(BTreeMap<String, String>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable `a=1&b=2` rendering (keys sorted).
    pub fn canonical(&self) -> String {
        self.pairs()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ── Requests ─────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum RequestKind {
    Fetch,
    Subscribe,
    Write,
    Deploy,
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub key: String,
    pub component_id: String,
    pub query: Query,
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub key: String,
    pub component_id: String,
    pub subject_type: SubjectType,
    pub observer: Observer,
}

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub key: String,
    pub action: Action,
}

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub key: String,
    /// Restrict the deploy to actions targeting this item id.
    pub id: Option<String>,
}

/// The operation a context carries.
#[derive(Debug, Clone)]
pub enum Request {
    Fetch(FetchRequest),
    Subscribe(SubscribeRequest),
    Write(WriteRequest),
    Deploy(DeployRequest),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Fetch(_) => RequestKind::Fetch,
            Self::Subscribe(_) => RequestKind::Subscribe,
            Self::Write(_) => RequestKind::Write,
            Self::Deploy(_) => RequestKind::Deploy,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Fetch(r) => &r.key,
            Self::Subscribe(r) => &r.key,
            Self::Write(r) => &r.key,
            Self::Deploy(r) => &r.key,
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────

/// Which layer produced `Response::data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Source {
    Cache,
    Remote,
    /// Shape default; no endpoint is mapped for the key.
    Default,
}

/// Accumulator populated by the layers.
///
/// Fields are write-once in practice; nothing enforces it.
#[derive(Default)]
pub struct Response {
    /// Projection used to fold pending writes onto fetched data.
    pub mutate: Option<Mutate>,
    pub data: Option<Value>,
    pub source: Option<Source>,
    pub subscription: Option<Subscription>,
    /// Actions buffered for the key, including the one being written.
    pub pending: Vec<Action>,
    /// Actions shipped by a deploy.
    pub actions: Vec<Action>,
    pub revision: Option<u64>,
}

impl Response {
    pub fn with_mutate(mutate: Mutate) -> Self {
        Self {
            mutate: Some(mutate),
            ..Self::default()
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("mutate", &self.mutate.as_ref().map(|_| "<fn>"))
            .field("data", &self.data)
            .field("source", &self.source)
            .field("subscription", &self.subscription)
            .field("pending", &self.pending.len())
            .field("actions", &self.actions.len())
            .field("revision", &self.revision)
            .finish()
    }
}

// ── Context ──────────────────────────────────────────────────────────

/// One operation's request/response envelope.
///
/// Not `Clone`: a context is moved into exactly one pipeline run.
#[derive(Debug)]
pub struct Context {
    id: Uuid,
    request: Request,
    pub response: Response,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self::with_response(request, Response::default())
    }

    pub fn with_response(request: Request, response: Response) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            response,
        }
    }

    pub fn fetch(key: impl Into<String>, component_id: impl Into<String>, query: Query) -> Self {
        Self::new(Request::Fetch(FetchRequest {
            key: key.into(),
            component_id: component_id.into(),
            query,
        }))
    }

    pub fn subscribe(
        key: impl Into<String>,
        component_id: impl Into<String>,
        subject_type: SubjectType,
        observer: Observer,
    ) -> Self {
        Self::new(Request::Subscribe(SubscribeRequest {
            key: key.into(),
            component_id: component_id.into(),
            subject_type,
            observer,
        }))
    }

    pub fn write(action: Action) -> Self {
        Self::new(Request::Write(WriteRequest {
            key: action.payload.key.clone(),
            action,
        }))
    }

    pub fn deploy(key: impl Into<String>, id: Option<String>) -> Self {
        Self::new(Request::Deploy(DeployRequest {
            key: key.into(),
            id,
        }))
    }

    /// Unique per context; useful for tracing a run across layers.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }

    pub fn key(&self) -> &str {
        self.request.key()
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}
