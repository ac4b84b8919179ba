// ── Observers and subscription handles ──
//
// The cache layer keeps an `ObserverRegistry` per stack. Subscribers get
// back an RAII `Subscription`; dropping it (or calling `unsubscribe`)
// removes the observer.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::action::Action;

/// What a subscriber wants to hear about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubjectType {
    /// The projected value of the key after each change.
    #[default]
    Value,
    /// Each write action as it passes through.
    Action,
}

/// A change pushed to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Value { key: String, value: Value },
    Action { key: String, action: Action },
}

impl Notification {
    pub fn key(&self) -> &str {
        match self {
            Self::Value { key, .. } | Self::Action { key, .. } => key,
        }
    }

    pub fn subject(&self) -> SubjectType {
        match self {
            Self::Value { .. } => SubjectType::Value,
            Self::Action { .. } => SubjectType::Action,
        }
    }
}

/// Callback receiving notifications. Cheap to clone.
#[derive(Clone)]
pub struct Observer {
    callback: Arc<dyn Fn(Notification) + Send + Sync>,
}

impl Observer {
    pub fn new(callback: impl Fn(Notification) + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }

    /// An observer that forwards into an unbounded channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Self::new(move |notification| {
            // Receiver gone means nobody is listening; nothing to do.
            let _ = tx.send(notification);
        });
        (observer, rx)
    }

    pub fn notify(&self, notification: Notification) {
        (self.callback)(notification);
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer").finish_non_exhaustive()
    }
}

// ── Registry ─────────────────────────────────────────────────────────

struct Registration {
    id: Uuid,
    component_id: String,
    subject: SubjectType,
    observer: Observer,
}

/// Observers keyed by data key.
#[derive(Default)]
pub struct ObserverRegistry {
    by_key: DashMap<String, Vec<Registration>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        self: &Arc<Self>,
        key: &str,
        component_id: &str,
        subject: SubjectType,
        observer: Observer,
    ) -> Subscription {
        let id = Uuid::new_v4();
        self.by_key
            .entry(key.to_owned())
            .or_default()
            .push(Registration {
                id,
                component_id: component_id.to_owned(),
                subject,
                observer,
            });
        debug!(%key, component_id, %subject, %id, "observer registered");
        Subscription {
            id,
            key: key.to_owned(),
            registry: Some(Arc::downgrade(self)),
        }
    }

    /// Deliver `notification` to every observer of its key and subject.
    ///
    /// Observers are collected first and invoked outside the map guard, so
    /// a callback may unsubscribe without deadlocking.
    pub fn notify(&self, notification: &Notification) -> usize {
        let targets: Vec<Observer> = self
            .by_key
            .get(notification.key())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|r| r.subject == notification.subject())
                    .map(|r| r.observer.clone())
                    .collect()
            })
            .unwrap_or_default();
        for observer in &targets {
            observer.notify(notification.clone());
        }
        targets.len()
    }

    pub fn has_observers(&self, key: &str, subject: SubjectType) -> bool {
        self.by_key
            .get(key)
            .is_some_and(|entries| entries.iter().any(|r| r.subject == subject))
    }

    /// Component ids currently observing `key`.
    pub fn components(&self, key: &str) -> Vec<String> {
        self.by_key
            .get(key)
            .map(|entries| entries.iter().map(|r| r.component_id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_key.iter().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, key: &str, id: Uuid) {
        let now_empty = match self.by_key.get_mut(key) {
            Some(mut entries) => {
                entries.retain(|r| r.id != id);
                entries.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_key.remove_if(key, |_, entries| entries.is_empty());
        }
    }
}

// ── Subscription handle ──────────────────────────────────────────────

/// Handle to a registered observer. Unsubscribes on drop.
pub struct Subscription {
    id: Uuid,
    key: String,
    registry: Option<Weak<ObserverRegistry>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// `false` once unsubscribed or once the owning stack is gone.
    pub fn is_active(&self) -> bool {
        self.registry
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.remove(&self.key, self.id);
            debug!(key = %self.key, id = %self.id, "observer removed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("active", &self.is_active())
            .finish()
    }
}
