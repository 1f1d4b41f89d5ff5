//! Memoized selectors over a single event.
//!
//! An [`EventSelector`] derives a value from the latest payload of one event
//! and caches it. A new derived value only replaces the cached one when the
//! equality function says it differs, so consumers can compare the returned
//! `Arc`s by pointer to skip redundant work, and subscribers are only called
//! when the derived value actually changed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use crate::store::{EventStore, Subscription};

/// Nesting depth past which [`deep_equal`] stops comparing and reports a change.
pub const MAX_COMPARE_DEPTH: usize = 128;

/// Replaceable equality used to decide whether a derived value changed.
pub type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

type Selector<T> = Box<dyn Fn(Option<&Value>) -> T + Send + Sync>;

/// Structural equality over JSON values.
///
/// Identical references compare equal without recursion. Numbers compare by
/// value, so `1` equals `1.0`. Structures nested deeper than
/// [`MAX_COMPARE_DEPTH`] are reported as different, which at worst costs one
/// spurious notification.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    deep_equal_at(a, b, 0)
}

fn deep_equal_at(a: &Value, b: &Value, depth: usize) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    if depth >= MAX_COMPARE_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|(l, r)| deep_equal_at(l, r, depth + 1))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(key, l)| {
                    y.get(key)
                        .is_some_and(|r| deep_equal_at(l, r, depth + 1))
                })
        }
        (Value::Number(x), Value::Number(y)) => {
            x == y || matches!((x.as_f64(), y.as_f64()), (Some(l), Some(r)) if l == r)
        }
        _ => a == b,
    }
}

struct MemoCache<T> {
    /// Snapshot the cached value was derived from; `None` until first computed.
    source: Option<Option<Arc<Value>>>,
    value: Option<Arc<T>>,
    /// Bumped every time `value` is replaced.
    version: u64,
}

struct SelectorInner<T> {
    store: EventStore,
    event: String,
    selector: Selector<T>,
    equality: Equality<T>,
    cache: Mutex<MemoCache<T>>,
}

fn same_snapshot(a: &Option<Arc<Value>>, b: &Option<Arc<Value>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

impl<T> SelectorInner<T> {
    /// Current derived value and its version.
    ///
    /// Runs the selector only when the store holds a different snapshot than
    /// the one the cache was built from. The selector runs without the cache
    /// lock held.
    fn refresh(&self) -> (Arc<T>, u64) {
        let snapshot = self.store.read(&self.event);

        {
            let cache = self.cache.lock();
            if let (Some(source), Some(value)) = (&cache.source, &cache.value) {
                if same_snapshot(source, &snapshot) {
                    return (Arc::clone(value), cache.version);
                }
            }
        }

        let derived = (self.selector)(snapshot.as_deref());

        let mut cache = self.cache.lock();
        cache.source = Some(snapshot);
        if let Some(previous) = &cache.value {
            if (self.equality)(&derived, previous) {
                return (Arc::clone(previous), cache.version);
            }
        }
        let value = Arc::new(derived);
        cache.value = Some(Arc::clone(&value));
        cache.version += 1;
        (value, cache.version)
    }
}

/// A memoized `(event, selector, equality)` subscription unit.
///
/// Every selector owns its cache. Clones share it, so clone only when the
/// sharing is intended.
pub struct EventSelector<T> {
    inner: Arc<SelectorInner<T>>,
}

impl<T> Clone for EventSelector<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> EventSelector<T>
where
    T: Send + Sync + 'static,
{
    /// Selector using `PartialEq` to detect changes.
    pub fn new<F>(store: EventStore, event: &str, selector: F) -> Self
    where
        T: PartialEq,
        F: Fn(Option<&Value>) -> T + Send + Sync + 'static,
    {
        Self::with_equality(store, event, selector, |a: &T, b: &T| a == b)
    }

    /// Selector with a custom equality function.
    pub fn with_equality<F, E>(store: EventStore, event: &str, selector: F, equality: E) -> Self
    where
        F: Fn(Option<&Value>) -> T + Send + Sync + 'static,
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SelectorInner {
                store,
                event: event.to_string(),
                selector: Box::new(selector),
                equality: Arc::new(equality),
                cache: Mutex::new(MemoCache {
                    source: None,
                    value: None,
                    version: 0,
                }),
            }),
        }
    }

    /// Current derived value.
    ///
    /// Returns the same `Arc` as the previous call unless the derived value
    /// changed in the meantime.
    pub fn get(&self) -> Arc<T> {
        self.inner.refresh().0
    }

    /// Call `callback` after writes that change the derived value.
    ///
    /// Writes that leave the derived value equal to the cached one are
    /// swallowed. Each subscription tracks what it has seen, so several
    /// subscriptions on one selector are all notified. The store only holds
    /// a weak reference to the selector: once every handle to it is dropped
    /// the subscription goes silent.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let seen = AtomicU64::new(self.inner.refresh().1);
        let inner: Weak<SelectorInner<T>> = Arc::downgrade(&self.inner);
        self.inner.store.subscribe(&self.inner.event, move || {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let (_, version) = inner.refresh();
            if seen.swap(version, Ordering::AcqRel) != version {
                callback();
            }
        })
    }

    /// Event this selector reads.
    pub fn event(&self) -> &str {
        &self.inner.event
    }
}

impl EventSelector<Value> {
    /// JSON-valued selector compared with [`deep_equal`].
    pub fn json<F>(store: EventStore, event: &str, selector: F) -> Self
    where
        F: Fn(Option<&Value>) -> Value + Send + Sync + 'static,
    {
        Self::with_equality(store, event, selector, deep_equal)
    }

    /// Select the value at a JSON pointer (e.g. `/game/teams/0/score`).
    ///
    /// Missing events and missing paths select `null`.
    pub fn pointer(store: EventStore, event: &str, pointer: &str) -> Self {
        let pointer = pointer.to_string();
        Self::json(store, event, move |payload| {
            payload
                .and_then(|p| p.pointer(&pointer))
                .cloned()
                .unwrap_or(Value::Null)
        })
    }
}

impl<T> std::fmt::Debug for EventSelector<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.inner.cache.lock();
        f.debug_struct("EventSelector")
            .field("event", &self.inner.event)
            .field("version", &cache.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counted_players(store: &EventStore) -> (EventSelector<Value>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let selector = EventSelector::json(store.clone(), "game:update_state", {
            let runs = Arc::clone(&runs);
            move |payload| {
                runs.fetch_add(1, Ordering::SeqCst);
                payload.map(|p| p["players"].clone()).unwrap_or(Value::Null)
            }
        });
        (selector, runs)
    }

    #[test]
    fn test_deep_equal_structural() {
        assert!(deep_equal(&json!({"a": [1, {"b": "c"}]}), &json!({"a": [1, {"b": "c"}]})));
        assert!(!deep_equal(&json!({"a": [1, 2]}), &json!({"a": [2, 1]})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
        assert!(!deep_equal(&json!({"a": 1}), &json!({"b": 1})));
        assert!(deep_equal(&json!(1), &json!(1.0)));
        assert!(!deep_equal(&json!("1"), &json!(1)));
        assert!(deep_equal(&Value::Null, &Value::Null));
    }

    #[test]
    fn test_deep_equal_key_order_irrelevant() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();
        assert!(deep_equal(&a, &b));
    }

    #[test]
    fn test_deep_equal_depth_guard() {
        let mut a = json!(0);
        let mut b = json!(0);
        for _ in 0..(MAX_COMPARE_DEPTH + 5) {
            a = json!([a]);
            b = json!([b]);
        }
        assert!(!deep_equal(&a, &b));
        assert!(deep_equal(&a, &a));
    }

    #[test]
    fn test_get_twice_returns_same_reference() {
        let store = EventStore::new();
        store.write("game:update_state", json!({"players": {"p1": {"boost": 50}}}));
        let (selector, runs) = counted_players(&store);

        let first = selector.get();
        let second = selector.get();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(*first, json!({"p1": {"boost": 50}}));
    }

    #[test]
    fn test_get_before_any_write() {
        let store = EventStore::new();
        let (selector, _) = counted_players(&store);
        assert_eq!(*selector.get(), Value::Null);
    }

    #[test]
    fn test_changed_slice_recomputes_and_notifies_once() {
        let store = EventStore::new();
        store.write("game:update_state", json!({"players": {"p1": {"boost": 50}}}));
        let (selector, runs) = counted_players(&store);

        let notified = Arc::new(AtomicUsize::new(0));
        let _sub = selector.subscribe({
            let notified = Arc::clone(&notified);
            move || {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });
        let before = selector.get();
        let runs_before = runs.load(Ordering::SeqCst);

        store.write("game:update_state", json!({"players": {"p1": {"boost": 20}}}));
        let after = selector.get();

        assert_eq!(runs.load(Ordering::SeqCst), runs_before + 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(*after, json!({"p1": {"boost": 20}}));
    }

    #[test]
    fn test_equal_slice_keeps_reference_and_stays_silent() {
        let store = EventStore::new();
        store.write(
            "game:update_state",
            json!({"game": {"time": 300}, "players": {"p1": {"boost": 50}}}),
        );
        let (selector, _) = counted_players(&store);

        let notified = Arc::new(AtomicUsize::new(0));
        let _sub = selector.subscribe({
            let notified = Arc::clone(&notified);
            move || {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });
        let before = selector.get();

        store.write(
            "game:update_state",
            json!({"game": {"time": 299}, "players": {"p1": {"boost": 50}}}),
        );

        assert_eq!(notified.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(&before, &selector.get()));
    }

    #[test]
    fn test_unsubscribed_selector_is_silent() {
        let store = EventStore::new();
        let selector = EventSelector::pointer(store.clone(), "e", "/n");
        let notified = Arc::new(AtomicUsize::new(0));
        let sub = selector.subscribe({
            let notified = Arc::clone(&notified);
            move || {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });

        sub.unsubscribe();
        store.write("e", json!({"n": 1}));
        assert_eq!(notified.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_multiple_subscriptions_each_notified() {
        let store = EventStore::new();
        let selector = EventSelector::pointer(store.clone(), "e", "/n");
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let _sa = selector.subscribe({
            let a = Arc::clone(&a);
            move || {
                a.fetch_add(1, Ordering::SeqCst);
            }
        });
        let _sb = selector.subscribe({
            let b = Arc::clone(&b);
            move || {
                b.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.write("e", json!({"n": 1}));
        store.write("e", json!({"n": 1, "other": true}));
        store.write("e", json!({"n": 2}));

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_custom_equality() {
        let store = EventStore::new();
        store.write("game:update_state", json!({"game": {"time": 120.4}}));
        let whole_seconds = EventSelector::with_equality(
            store.clone(),
            "game:update_state",
            |payload| payload.and_then(|p| p["game"]["time"].as_f64()).unwrap_or(0.0),
            |a: &f64, b: &f64| a.floor() == b.floor(),
        );

        let first = whole_seconds.get();
        store.write("game:update_state", json!({"game": {"time": 120.9}}));
        assert!(Arc::ptr_eq(&first, &whole_seconds.get()));

        store.write("game:update_state", json!({"game": {"time": 119.9}}));
        assert_eq!(*whole_seconds.get(), 119.9);
    }

    #[test]
    fn test_separate_selectors_do_not_share_cache() {
        let store = EventStore::new();
        store.write("e", json!({"n": 1}));
        let a = EventSelector::pointer(store.clone(), "e", "/n");
        let b = EventSelector::pointer(store.clone(), "e", "/n");

        assert!(!Arc::ptr_eq(&a.get(), &b.get()));
        assert!(Arc::ptr_eq(&a.get(), &a.clone().get()));
    }

    #[test]
    fn test_pointer_missing_path_is_null() {
        let store = EventStore::new();
        store.write("e", json!({"a": 1}));
        let selector = EventSelector::pointer(store, "e", "/b/c");
        assert_eq!(*selector.get(), Value::Null);
        assert_eq!(selector.event(), "e");
    }

    #[test]
    fn test_subscription_does_not_keep_store_alive() {
        let marker = Arc::new(());
        let store = EventStore::new();
        let selector = EventSelector::pointer(store.clone(), "game:update_state", "/game/time_seconds");
        let sub = selector.subscribe({
            let marker = Arc::clone(&marker);
            move || {
                let _ = &marker;
            }
        });
        assert_eq!(Arc::strong_count(&marker), 2);

        drop(sub);
        drop(selector);
        drop(store);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_dropped_selector_goes_silent() {
        let store = EventStore::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let selector = EventSelector::pointer(store.clone(), "game:update_state", "/game/time_seconds");
        let sub = selector.subscribe({
            let hits = Arc::clone(&hits);
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        });

        store.write("game:update_state", json!({"game": {"time_seconds": 300}}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(selector);
        store.write("game:update_state", json!({"game": {"time_seconds": 299}}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(sub.is_active());
    }
}
