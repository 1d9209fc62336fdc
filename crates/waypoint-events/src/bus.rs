use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use thiserror::Error;
use tracing::error;

use crate::envelope::EventEnvelope;

#[derive(Debug, Error)]
#[error("event handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type Handler = Box<dyn Fn(&EventEnvelope) -> Result<(), HandlerError> + Send + Sync>;

/// Opaque token returned by `on`/`once`, passed back to `off` to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

enum Lifetime {
    Persistent,
    Once,
}

struct Subscription {
    id: SubscriptionId,
    lifetime: Lifetime,
    handler: Handler,
}

/// A synchronous, in-process pub/sub bus keyed by event type (spec §4.10).
///
/// Handlers run synchronously, in registration order, on the calling thread
/// of `emit`. A handler that returns `Err` is logged and skipped — it never
/// blocks or prevents the remaining handlers for that event type from
/// running. This is an ordered, synchronous call chain rather than a
/// fire-and-forget broadcast across async tasks.
pub struct EventBus {
    handlers: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribe(&self, event_type: &str, lifetime: Lifetime, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write().expect("event bus lock poisoned");
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(Subscription { id, lifetime, handler });
        id
    }

    pub fn on(&self, event_type: &str, handler: Handler) -> SubscriptionId {
        self.subscribe(event_type, Lifetime::Persistent, handler)
    }

    pub fn once(&self, event_type: &str, handler: Handler) -> SubscriptionId {
        self.subscribe(event_type, Lifetime::Once, handler)
    }

    pub fn off(&self, event_type: &str, id: SubscriptionId) {
        let mut handlers = self.handlers.write().expect("event bus lock poisoned");
        if let Some(subs) = handlers.get_mut(event_type) {
            subs.retain(|sub| sub.id != id);
        }
    }

    pub fn clear(&self) {
        self.handlers.write().expect("event bus lock poisoned").clear();
    }

    /// Invokes every handler registered for `envelope.event_type`, in the
    /// order they were registered. `once` handlers are removed after this
    /// call regardless of whether they returned `Ok` or `Err`.
    pub fn emit(&self, envelope: &EventEnvelope) {
        let mut once_fired = Vec::new();
        {
            let handlers = self.handlers.read().expect("event bus lock poisoned");
            if let Some(subs) = handlers.get(&envelope.event_type) {
                for sub in subs {
                    if let Err(err) = (sub.handler)(envelope) {
                        error!(
                            event_type = %envelope.event_type,
                            event_id = %envelope.event_id,
                            error = %err,
                            "event handler failed"
                        );
                    }
                    if matches!(sub.lifetime, Lifetime::Once) {
                        once_fired.push(sub.id);
                    }
                }
            }
        }
        if !once_fired.is_empty() {
            let mut handlers = self.handlers.write().expect("event bus lock poisoned");
            if let Some(subs) = handlers.get_mut(&envelope.event_type) {
                subs.retain(|sub| !once_fired.contains(&sub.id));
            }
        }
    }
}
