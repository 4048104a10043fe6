//! Ordered listener registries.
//!
//! A registry maps a key to an ordered list of callbacks plus a wildcard list
//! that sees everything. Registration order is invocation order, duplicates
//! are kept, and removal matches by `Arc` identity.
//!
//! Dispatch works on a snapshot of the lists taken under the lock; the lock is
//! released before any callback runs, so callbacks may register or remove
//! listeners (themselves included) while being dispatched.

use crate::event::{EventKind, SessionEvent};
use crate::frame::InboundFrame;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback registered on a registry.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Raw inbound-frame listeners keyed by the frame's `type` string.
pub type FrameListeners = ListenerRegistry<String, InboundFrame>;

/// Typed event bus keyed by [`EventKind`].
pub type EventBus = ListenerRegistry<EventKind, SessionEvent>;

/// Wrap a closure as a listener handle.
///
/// Keep the returned handle around to remove the listener later.
pub fn listener<T, F>(callback: F) -> Listener<T>
where
    F: Fn(&T) + Send + Sync + 'static,
{
    Arc::new(callback)
}

struct Slots<K, T> {
    by_key: HashMap<K, Vec<Listener<T>>>,
    any: Vec<Listener<T>>,
}

/// Shared, cloneable listener registry.
pub struct ListenerRegistry<K, T> {
    inner: Arc<Mutex<Slots<K, T>>>,
}

impl<K, T> Clone for ListenerRegistry<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, T> Default for ListenerRegistry<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, T> ListenerRegistry<K, T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                by_key: HashMap::new(),
                any: Vec::new(),
            })),
        }
    }

    /// Append a listener for `key`.
    pub fn on(&self, key: K, listener: Listener<T>) {
        self.slots().by_key.entry(key).or_default().push(listener);
    }

    /// Remove the first registration of `listener` under `key`.
    ///
    /// Returns whether anything was removed.
    pub fn off(&self, key: &K, listener: &Listener<T>) -> bool {
        let mut slots = self.slots();
        let Some(list) = slots.by_key.get_mut(key) else {
            return false;
        };
        let removed = remove_first(list, listener);
        if list.is_empty() {
            slots.by_key.remove(key);
        }
        removed
    }

    /// Append a wildcard listener.
    pub fn on_any(&self, listener: Listener<T>) {
        self.slots().any.push(listener);
    }

    /// Remove the first wildcard registration of `listener`.
    pub fn off_any(&self, listener: &Listener<T>) -> bool {
        remove_first(&mut self.slots().any, listener)
    }

    /// Invoke listeners for `key`, then wildcard listeners, in registration
    /// order. Returns the number of callbacks invoked.
    pub fn dispatch(&self, key: &K, item: &T) -> usize {
        let snapshot: Vec<Listener<T>> = {
            let slots = self.slots();
            slots
                .by_key
                .get(key)
                .into_iter()
                .flatten()
                .chain(slots.any.iter())
                .cloned()
                .collect()
        };
        for callback in &snapshot {
            callback(item);
        }
        snapshot.len()
    }

    fn slots(&self) -> MutexGuard<'_, Slots<K, T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn remove_first<T>(list: &mut Vec<Listener<T>>, listener: &Listener<T>) -> bool {
    match list
        .iter()
        .position(|existing| same_listener(existing, listener))
    {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

fn same_listener<T>(left: &Listener<T>, right: &Listener<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    impl<K: Eq + Hash, T> ListenerRegistry<K, T> {
        fn count(&self, key: &K) -> usize {
            self.slots().by_key.get(key).map_or(0, Vec::len)
        }

        fn count_any(&self) -> usize {
            self.slots().any.len()
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener<u32> {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        listener(move |value: &u32| {
            log.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(format!("{tag}:{value}"));
        })
    }

    fn entries(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    #[test]
    fn dispatch_runs_exact_then_wildcard_in_registration_order() {
        let registry: ListenerRegistry<&'static str, u32> = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        registry.on_any(recorder(&log, "any"));
        registry.on("a", recorder(&log, "a1"));
        registry.on("b", recorder(&log, "b1"));
        registry.on("a", recorder(&log, "a2"));

        assert_eq!(registry.dispatch(&"a", &7), 3);
        assert_eq!(entries(&log), vec!["a1:7", "a2:7", "any:7"]);
    }

    #[test]
    fn duplicate_registration_fires_twice_and_off_removes_one() {
        let registry: ListenerRegistry<&'static str, u32> = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = {
            let hits = Arc::clone(&hits);
            listener(move |_: &u32| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        registry.on("a", Arc::clone(&counter));
        registry.on("a", Arc::clone(&counter));
        registry.dispatch(&"a", &1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(registry.off(&"a", &counter));
        assert_eq!(registry.count(&"a"), 1);
        registry.dispatch(&"a", &1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(registry.off(&"a", &counter));
        assert!(!registry.off(&"a", &counter));
        assert_eq!(registry.dispatch(&"a", &1), 0);
    }

    #[test]
    fn off_matches_identity_not_behavior() {
        let registry: ListenerRegistry<&'static str, u32> = ListenerRegistry::new();
        let first: Listener<u32> = listener(|_| {});
        let lookalike: Listener<u32> = listener(|_| {});
        registry.on("a", Arc::clone(&first));

        assert!(!registry.off(&"a", &lookalike));
        assert!(!registry.off(&"b", &first));
        assert!(registry.off(&"a", &first));
    }

    #[test]
    fn self_removal_during_dispatch_keeps_other_listeners() {
        let registry: ListenerRegistry<&'static str, u32> = ListenerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Listener<u32>>>> = Arc::new(Mutex::new(None));

        let once = {
            let registry = registry.clone();
            let slot = Arc::clone(&slot);
            let log = Arc::clone(&log);
            listener(move |value: &u32| {
                log.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(format!("once:{value}"));
                let me = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
                if let Some(me) = me {
                    registry.off(&"a", &me);
                }
            })
        };
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&once));

        registry.on("a", recorder(&log, "before"));
        registry.on("a", once);
        registry.on("a", recorder(&log, "after"));

        registry.dispatch(&"a", &1);
        registry.dispatch(&"a", &2);

        assert_eq!(
            entries(&log),
            vec!["before:1", "once:1", "after:1", "before:2", "after:2"]
        );
    }

    #[test]
    fn wildcard_off_removes_first_occurrence() {
        let registry: ListenerRegistry<&'static str, u32> = ListenerRegistry::new();
        let any: Listener<u32> = listener(|_| {});
        registry.on_any(Arc::clone(&any));
        registry.on_any(Arc::clone(&any));
        assert!(registry.off_any(&any));
        assert_eq!(registry.count_any(), 1);
    }
}
