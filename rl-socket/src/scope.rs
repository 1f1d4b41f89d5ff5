//! Ambient "current store" for consumers that do not carry a store handle.
//!
//! A composition root enters a store with [`EventStore::enter`]; code running
//! on the same thread while the guard lives can then use [`use_event`] and
//! friends. Using them with no store entered is a wiring bug and panics.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::selector::EventSelector;
use crate::store::{EventStore, Subscription};

thread_local! {
    static CURRENT: RefCell<Vec<EventStore>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a store installed as current until dropped.
///
/// Guards nest; the innermost live guard wins. The guard is `!Send` because
/// the scope is per thread.
#[must_use = "the store is only current while the guard is alive"]
pub struct ScopeGuard {
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

impl EventStore {
    /// Install this store as the current store of the calling thread.
    pub fn enter(&self) -> ScopeGuard {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        ScopeGuard {
            _not_send: PhantomData,
        }
    }
}

/// The current store, if any.
pub fn try_current() -> Option<EventStore> {
    CURRENT.with(|stack| stack.borrow().last().cloned())
}

/// The current store.
///
/// # Panics
///
/// Panics when called outside of [`EventStore::enter`].
pub fn current() -> EventStore {
    match try_current() {
        Some(store) => store,
        None => panic!("event store accessed outside of a store scope; call EventStore::enter first"),
    }
}

/// Latest payload of `event` in the current store.
pub fn use_event(event: &str) -> Option<Arc<Value>> {
    current().read(event)
}

/// Subscribe to `event` in the current store.
pub fn subscribe_event<F>(event: &str, callback: F) -> Subscription
where
    F: Fn() + Send + Sync + 'static,
{
    current().subscribe(event, callback)
}

/// Build a memoized selector over `event` in the current store.
pub fn use_event_selector<T, F>(event: &str, selector: F) -> EventSelector<T>
where
    T: PartialEq + Send + Sync + 'static,
    F: Fn(Option<&Value>) -> T + Send + Sync + 'static,
{
    EventSelector::new(current(), event, selector)
}

/// Like [`use_event_selector`], with `equality` deciding whether the derived
/// value changed.
pub fn use_event_selector_with<T, F, E>(event: &str, selector: F, equality: E) -> EventSelector<T>
where
    T: Send + Sync + 'static,
    F: Fn(Option<&Value>) -> T + Send + Sync + 'static,
    E: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    EventSelector::with_equality(current(), event, selector, equality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    #[should_panic(expected = "outside of a store scope")]
    fn test_use_event_without_scope_panics() {
        let _ = use_event("game:update_state");
    }

    #[test]
    #[should_panic(expected = "outside of a store scope")]
    fn test_subscribe_without_scope_panics() {
        let _sub = subscribe_event("game:update_state", || {});
    }

    #[test]
    fn test_use_event_inside_scope() {
        let store = EventStore::new();
        store.write("sos:version", json!("2.0"));

        let _guard = store.enter();
        assert_eq!(*use_event("sos:version").unwrap(), json!("2.0"));
        assert!(use_event("game:initialized").is_none());
    }

    #[test]
    fn test_nested_scopes_restore_outer() {
        let outer = EventStore::new();
        let inner = EventStore::new();
        outer.write("e", json!("outer"));
        inner.write("e", json!("inner"));

        let _outer_guard = outer.enter();
        {
            let _inner_guard = inner.enter();
            assert_eq!(*use_event("e").unwrap(), json!("inner"));
        }
        assert_eq!(*use_event("e").unwrap(), json!("outer"));
    }

    #[test]
    fn test_scope_ends_with_guard() {
        let store = EventStore::new();
        drop(store.enter());
        assert!(try_current().is_none());
    }

    #[test]
    fn test_selector_from_scope() {
        let store = EventStore::new();
        store.write("game:update_state", json!({"hasGame": true}));

        let _guard = store.enter();
        let has_game = use_event_selector("game:update_state", |payload| {
            payload.and_then(|p| p["hasGame"].as_bool()).unwrap_or(false)
        });
        assert!(*has_game.get());
    }

    #[test]
    fn test_selector_with_equality_from_scope() {
        let store = EventStore::new();
        store.write("game:update_state", json!({"game": {"time_seconds": 300.4}}));

        let _guard = store.enter();
        // Whole seconds only: sub-second ticks are not a change.
        let clock = use_event_selector_with(
            "game:update_state",
            |payload| {
                payload
                    .and_then(|p| p["game"]["time_seconds"].as_f64())
                    .unwrap_or(0.0)
            },
            |a: &f64, b: &f64| a.floor() == b.floor(),
        );
        let first = clock.get();
        assert_eq!(*first, 300.4);

        store.write("game:update_state", json!({"game": {"time_seconds": 300.1}}));
        assert!(Arc::ptr_eq(&first, &clock.get()));

        store.write("game:update_state", json!({"game": {"time_seconds": 299.9}}));
        assert_eq!(*clock.get(), 299.9);
    }

    #[test]
    #[should_panic(expected = "outside of a store scope")]
    fn test_selector_with_equality_without_scope_panics() {
        let _ = use_event_selector_with("game:update_state", |_| 0u8, |a: &u8, b: &u8| a == b);
    }
}
