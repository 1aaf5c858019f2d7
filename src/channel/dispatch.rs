//! Subscriber sets keyed by message type.
//!
//! Dispatch always works on a snapshot: callbacks are cloned out of the set
//! under the lock and invoked after it is released, so a callback may
//! subscribe or unsubscribe without affecting the pass that invoked it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::channel::proto::{InboundFrame, WILDCARD};

/// Subscriber callback. Receives `data` for typed subscriptions and the full
/// envelope for wildcard subscriptions.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    by_type: HashMap<String, Vec<(u64, Callback)>>,
}

/// Shared, cloneable set of subscriptions owned by one channel.
#[derive(Clone, Default)]
pub(crate) struct SubscriberRegistry {
    inner: Arc<Mutex<Subscribers>>,
}

impl SubscriberRegistry {
    pub(crate) fn subscribe(&self, message_type: &str, callback: Callback) -> Subscription {
        let mut guard = self.lock();
        guard.next_id += 1;
        let id = guard.next_id;
        guard
            .by_type
            .entry(message_type.to_string())
            .or_default()
            .push((id, callback));

        Subscription {
            registry: Arc::downgrade(&self.inner),
            message_type: message_type.to_string(),
            id,
        }
    }

    /// Copies out the callbacks a frame of `message_type` would reach.
    pub(crate) fn snapshot(&self, message_type: Option<&str>) -> DispatchSnapshot {
        let guard = self.lock();
        let typed = message_type
            .filter(|kind| *kind != WILDCARD)
            .and_then(|kind| guard.by_type.get(kind))
            .map(|set| set.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        let wildcard = guard
            .by_type
            .get(WILDCARD)
            .map(|set| set.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        DispatchSnapshot { typed, wildcard }
    }

    pub(crate) fn count(&self, message_type: &str) -> usize {
        self.lock().by_type.get(message_type).map_or(0, Vec::len)
    }

    fn lock(&self) -> MutexGuard<'_, Subscribers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Callbacks captured for a single dispatch pass.
pub(crate) struct DispatchSnapshot {
    typed: Vec<Callback>,
    wildcard: Vec<Callback>,
}

impl DispatchSnapshot {
    /// Invokes every captured callback once. Returns the number invoked.
    pub(crate) fn deliver(&self, frame: &InboundFrame) -> usize {
        for callback in &self.typed {
            callback(frame.data());
        }
        for callback in &self.wildcard {
            callback(frame.envelope());
        }
        self.typed.len() + self.wildcard.len()
    }
}

/// Handle returned by subscribe calls.
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to remove it. Repeated calls are no-ops.
#[derive(Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Subscribers>>,
    message_type: String,
    id: u64,
}

impl Subscription {
    /// Removes exactly this callback from its message type's set.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = guard.by_type.get_mut(&self.message_type) {
            set.retain(|(id, _)| *id != self.id);
            if set.is_empty() {
                guard.by_type.remove(&self.message_type);
            }
        }
    }

    /// Message type this subscription listens to.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("message_type", &self.message_type)
            .field("id", &self.id)
            .finish()
    }
}

/// Wraps a typed callback in a checked decode of the dispatched value.
///
/// A value that does not match `T` is logged and skipped for this subscriber
/// only.
pub(crate) fn decoding<T, F>(message_type: &str, callback: F) -> Callback
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    let message_type = message_type.to_string();
    Arc::new(move |value: &Value| match <T as Deserialize>::deserialize(value) {
        Ok(decoded) => callback(decoded),
        Err(err) => {
            warn!(
                event = "payload_decode_failed",
                message_type = %message_type,
                error = %err
            );
        }
    })
}
