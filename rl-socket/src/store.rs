//! Per-event snapshot store.
//!
//! Keeps the latest payload of every event name and a list of zero-argument
//! subscribers per name. A write replaces the snapshot and then calls the
//! subscribers of that name synchronously, in subscription order, so a
//! subscriber that reads the same event always sees the new value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    snapshots: HashMap<String, Arc<Value>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    next_id: u64,
}

/// Latest-value store with per-event change notification.
///
/// Cloning is cheap and yields a handle to the same store. Stored payloads
/// are shared as `Arc<Value>` and only ever replaced whole, so two reads with
/// no write in between return the same allocation.
#[derive(Clone, Default)]
pub struct EventStore {
    inner: Arc<Mutex<Inner>>,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of `event` and notify its subscribers.
    ///
    /// Subscribers are taken as they are when notification starts: one that
    /// subscribes during the pass is not called until the next write, and
    /// one that is unsubscribed during the pass is skipped. Returns the
    /// number of subscribers called.
    pub fn write(&self, event: &str, payload: Value) -> usize {
        let subscribers = {
            let mut inner = self.inner.lock();
            inner.snapshots.insert(event.to_string(), Arc::new(payload));
            inner.subscribers.get(event).cloned().unwrap_or_default()
        };

        let mut notified = 0;
        for subscriber in &subscribers {
            if subscriber.active.load(Ordering::Acquire) {
                (subscriber.callback)();
                notified += 1;
            }
        }

        debug!("store: wrote {event}, notified {notified} subscriber(s)");
        notified
    }

    /// Latest payload of `event`, or `None` if it was never written.
    pub fn read(&self, event: &str) -> Option<Arc<Value>> {
        self.inner.lock().snapshots.get(event).cloned()
    }

    /// Deserialize the latest payload of `event` into a typed view.
    ///
    /// Returns `None` when the event was never written or its payload does
    /// not fit `T`.
    pub fn read_as<T: DeserializeOwned>(&self, event: &str) -> Option<T> {
        let payload = self.read(event)?;
        T::deserialize(payload.as_ref()).ok()
    }

    /// Register `callback` for writes to `event`.
    ///
    /// The same callback may be registered more than once; each registration
    /// is independent and removed by its own [`Subscription`].
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .subscribers
                .entry(event.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    active: Arc::clone(&active),
                    callback: Arc::new(callback),
                });
            id
        };

        Subscription {
            store: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
            active,
        }
    }

    /// Number of live subscribers for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Names of every event written so far, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().snapshots.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Every snapshot written so far, sorted by event name.
    pub fn snapshot_all(&self) -> Vec<(String, Arc<Value>)> {
        let mut all: Vec<(String, Arc<Value>)> = self
            .inner
            .lock()
            .snapshots
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("EventStore")
            .field("events", &inner.snapshots.len())
            .field("subscribed_events", &inner.subscribers.len())
            .finish()
    }
}

/// Handle returned by [`EventStore::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
/// The handle does not keep the store alive.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    store: Weak<Mutex<Inner>>,
    event: String,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Remove this registration. Further calls are no-ops.
    ///
    /// Takes effect immediately, including for a notification pass that is
    /// currently running.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut inner = store.lock();
        if let Some(list) = inner.subscribers.get_mut(&self.event) {
            list.retain(|s| s.id != self.id);
            if list.is_empty() {
                inner.subscribers.remove(&self.event);
            }
        }
    }

    /// Whether the registration is still live.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Event name this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
