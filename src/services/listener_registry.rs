//! Per-key listener registry with fan-out and dead-handle pruning

use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::models::{LookupKey, LookupResponse};
use crate::services::traits::LookupListener;

/// Shared handle type for registered listeners
pub type ListenerHandle = Arc<dyn LookupListener>;

fn same_listener(registered: &Weak<dyn LookupListener>, listener: &ListenerHandle) -> bool {
    std::ptr::addr_eq(registered.as_ptr(), Arc::as_ptr(listener))
}

/// Maps canonical keys to the listeners interested in them.
///
/// The registry only holds weak references: a listener whose owner dropped
/// every strong handle is pruned the next time its key is touched and is
/// never notified.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<LookupKey, Vec<Weak<dyn LookupListener>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `key`. Returns false if it was already registered.
    pub fn subscribe(&self, key: &LookupKey, listener: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let entries = listeners.entry(key.clone()).or_default();
        entries.retain(|weak| weak.strong_count() > 0);

        if entries.iter().any(|weak| same_listener(weak, listener)) {
            debug!("Listener already registered for {}", key);
            return false;
        }

        entries.push(Arc::downgrade(listener));
        debug!("Registered listener for {} ({} total)", key, entries.len());
        true
    }

    /// Remove one registration. Unknown listeners are ignored.
    pub fn unsubscribe(&self, key: &LookupKey, listener: &ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let Some(entries) = listeners.get_mut(key) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|weak| weak.strong_count() > 0 && !same_listener(weak, listener));
        let removed = entries.len() < before;
        if entries.is_empty() {
            listeners.remove(key);
        }
        removed
    }

    /// Remove every registration for `key`, returning how many were live
    pub fn unsubscribe_all(&self, key: &LookupKey) -> usize {
        self.listeners
            .write()
            .remove(key)
            .map(|entries| entries.iter().filter(|weak| weak.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Deliver `response` to every live listener of `key` in registration order.
    ///
    /// Dead handles are pruned first. Listeners run outside the registry lock,
    /// so they may subscribe or unsubscribe from inside the callback. A
    /// panicking listener is logged and skipped. Returns the number of
    /// listeners that completed without panicking.
    pub fn notify_all(&self, key: &LookupKey, response: &LookupResponse) -> usize {
        let targets: Vec<ListenerHandle> = {
            let mut listeners = self.listeners.write();
            let Some(entries) = listeners.get_mut(key) else {
                return 0;
            };
            let mut live = Vec::with_capacity(entries.len());
            entries.retain(|weak| match weak.upgrade() {
                Some(listener) => {
                    live.push(listener);
                    true
                }
                None => false,
            });
            if entries.is_empty() {
                listeners.remove(key);
            }
            live
        };

        let mut delivered = 0;
        for listener in targets {
            match catch_unwind(AssertUnwindSafe(|| listener.on_new_info(response))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Listener for {} panicked during notification", key),
            }
        }
        delivered
    }

    pub fn is_subscribed(&self, key: &LookupKey, listener: &ListenerHandle) -> bool {
        self.listeners
            .read()
            .get(key)
            .is_some_and(|entries| entries.iter().any(|weak| same_listener(weak, listener)))
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Number of keys with at least one registration (live or not yet pruned)
    pub fn key_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Number of live registrations across all keys
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .values()
            .flat_map(|entries| entries.iter())
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}
