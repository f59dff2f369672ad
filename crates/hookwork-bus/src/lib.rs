//! Typed publish/subscribe event bus.
//!
//! Event types are declared with [`EventBus::define`] together with a JSON
//! Schema for their payload. [`EventBus::publish`] validates the payload
//! before anything is delivered, then hands the event to typed subscribers
//! of that exact type and to wildcard subscribers, in registration order.
//!
//! A bus belongs to one running instance; [`EventBus::dispose`] drops every
//! listener and closes the watch channel.

pub mod catalog;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::BoxFuture;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};

/// A published event: type tag plus validated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Invalid schema for event '{event}': {reason}")]
    InvalidSchema { event: String, reason: String },

    #[error("Invalid payload for event '{event}' at {field}: {reason}")]
    Validation {
        event: String,
        field: String,
        reason: String,
    },

    #[error("Event bus has been disposed")]
    Disposed,
}

/// Async event subscriber.
pub type Subscriber =
    Arc<dyn Fn(Event) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Topic {
    Exact(String),
    All,
}

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: Subscriber,
}

struct EventDefinition {
    schema: serde_json::Value,
    validator: JSONSchema,
}

/// Per-instance event bus.
pub struct EventBus {
    definitions: RwLock<HashMap<String, EventDefinition>>,
    subscriptions: RwLock<Vec<Subscription>>,
    watch_tx: RwLock<Option<broadcast::Sender<Event>>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(256);
        Self {
            definitions: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(Vec::new()),
            watch_tx: RwLock::new(Some(watch_tx)),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_live(&self) -> Result<(), BusError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Disposed);
        }
        Ok(())
    }

    /// Register an event type with its payload schema. Redefining a type
    /// replaces its schema.
    pub async fn define(&self, kind: &str, schema: serde_json::Value) -> Result<(), BusError> {
        self.ensure_live()?;
        let validator = JSONSchema::compile(&schema).map_err(|e| BusError::InvalidSchema {
            event: kind.to_string(),
            reason: e.to_string(),
        })?;
        let previous = self
            .definitions
            .write()
            .await
            .insert(kind.to_string(), EventDefinition { schema, validator });
        if previous.is_some() {
            debug!(event = kind, "Event type redefined");
        }
        Ok(())
    }

    /// Whether an event type has been defined.
    pub async fn is_defined(&self, kind: &str) -> bool {
        self.definitions.read().await.contains_key(kind)
    }

    /// Defined event types with their schemas, sorted by type.
    pub async fn definitions(&self) -> Vec<(String, serde_json::Value)> {
        let defs = self.definitions.read().await;
        let mut list: Vec<_> = defs
            .iter()
            .map(|(k, d)| (k.clone(), d.schema.clone()))
            .collect();
        list.sort_by(|a, b| a.0.cmp(&b.0));
        list
    }

    /// Validate `properties` against the schema for `kind` without publishing.
    pub async fn validate(&self, kind: &str, properties: &serde_json::Value) -> Result<(), BusError> {
        let defs = self.definitions.read().await;
        let def = defs
            .get(kind)
            .ok_or_else(|| BusError::UnknownEvent(kind.to_string()))?;

        if let Err(mut errors) = def.validator.validate(properties) {
            let (field, reason) = match errors.next() {
                Some(e) => (payload_field(&e.instance_path.to_string()), e.to_string()),
                None => ("properties".to_string(), "payload rejected".to_string()),
            };
            return Err(BusError::Validation {
                event: kind.to_string(),
                field,
                reason,
            });
        }
        Ok(())
    }

    /// Validate and deliver an event. Returns the number of subscribers it
    /// was delivered to. Nothing is delivered when validation fails.
    pub async fn publish(&self, kind: &str, properties: serde_json::Value) -> Result<usize, BusError> {
        self.ensure_live()?;
        self.validate(kind, &properties).await?;

        let event = Event {
            kind: kind.to_string(),
            properties,
        };

        // Snapshot handlers so subscribers may (un)subscribe while handling.
        let handlers: Vec<(SubscriptionId, Subscriber)> = {
            let subs = self.subscriptions.read().await;
            subs.iter()
                .filter(|s| match &s.topic {
                    Topic::All => true,
                    Topic::Exact(k) => k == kind,
                })
                .map(|s| (s.id, s.handler.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, handler) in handlers {
            if let Err(e) = handler(event.clone()).await {
                warn!(event = kind, subscription = id.0, error = %e, "Event subscriber error, continuing");
            }
            delivered += 1;
        }

        if let Some(tx) = self.watch_tx.read().await.as_ref() {
            // No receivers is fine.
            let _ = tx.send(event);
        }

        debug!(event = kind, delivered, "Published event");
        Ok(delivered)
    }

    async fn add(&self, topic: Topic, handler: Subscriber) -> Result<SubscriptionId, BusError> {
        self.ensure_live()?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .write()
            .await
            .push(Subscription { id, topic, handler });
        Ok(id)
    }

    /// Subscribe to one event type.
    pub async fn subscribe<F, Fut>(&self, kind: &str, f: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(Topic::Exact(kind.to_string()), boxed(f)).await
    }

    /// Subscribe to every event type.
    pub async fn subscribe_all<F, Fut>(&self, f: F) -> Result<SubscriptionId, BusError>
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.add(Topic::All, boxed(f)).await
    }

    /// Remove one subscription. Returns whether it existed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().await;
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }

    /// Receive a copy of every event published from now on.
    pub async fn watch(&self) -> Result<broadcast::Receiver<Event>, BusError> {
        self.ensure_live()?;
        self.watch_tx
            .read()
            .await
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or(BusError::Disposed)
    }

    /// Tear the bus down: drop all listeners and close watchers. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut subs = self.subscriptions.write().await;
            let n = subs.len();
            subs.clear();
            n
        };
        self.watch_tx.write().await.take();
        self.definitions.write().await.clear();
        info!(dropped, "Event bus disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn boxed<F, Fut>(f: F) -> Subscriber
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Map a JSON pointer inside the payload (e.g. `/info/id`) to a dotted field
/// path rooted at `properties`.
fn payload_field(pointer: &str) -> String {
    let trimmed = pointer.trim_start_matches('/');
    if trimmed.is_empty() {
        "properties".to_string()
    } else {
        format!("properties.{}", trimmed.replace('/', "."))
    }
}
