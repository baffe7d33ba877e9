//! Subscription Hub Module
//!
//! Per-key and global subscriber lists with failure-isolated fan-out.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::events::CacheEvent;

/// Callback invoked synchronously for every matching event.
pub type Subscriber = Arc<dyn Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync>;

// == Subscription Id ==
/// Handle returned by `subscribe`, needed to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    id: u64,
    key: Option<String>,
}

impl SubscriptionId {
    /// Key this subscription watches, `None` for global subscriptions.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

// == Subscription Hub ==
#[derive(Default)]
pub struct SubscriptionHub {
    keyed: RwLock<HashMap<String, Vec<(u64, Subscriber)>>>,
    global: RwLock<Vec<(u64, Subscriber)>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to events for one key.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.keyed
            .write()
            .entry(key.to_string())
            .or_default()
            .push((id, Arc::new(callback) as Subscriber));
        SubscriptionId {
            id,
            key: Some(key.to_string()),
        }
    }

    /// Subscribes to every event regardless of key.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.global.write().push((id, Arc::new(callback) as Subscriber));
        SubscriptionId { id, key: None }
    }

    // == Unsubscribe ==
    /// Removes a subscription. Returns false if it was already gone.
    ///
    /// A per-key list left empty is dropped on the spot.
    pub fn unsubscribe(&self, subscription: &SubscriptionId) -> bool {
        match &subscription.key {
            Some(key) => {
                let mut keyed = self.keyed.write();
                let Some(list) = keyed.get_mut(key) else {
                    return false;
                };
                let before = list.len();
                list.retain(|(id, _)| *id != subscription.id);
                let removed = list.len() != before;
                if list.is_empty() {
                    keyed.remove(key);
                }
                removed
            }
            None => {
                let mut global = self.global.write();
                let before = global.len();
                global.retain(|(id, _)| *id != subscription.id);
                global.len() != before
            }
        }
    }

    /// Whether an event for `key` would reach anyone.
    pub fn is_watching(&self, key: &str) -> bool {
        !self.global.read().is_empty() || self.keyed.read().contains_key(key)
    }

    /// Number of keys with at least one subscriber.
    pub fn watched_keys(&self) -> usize {
        self.keyed.read().len()
    }

    /// Subscriber callbacks that failed or panicked so far.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    // == Emit ==
    /// Builds and delivers an event only if someone is listening for `key`.
    pub fn emit<F>(&self, key: &str, build: F) -> usize
    where
        F: FnOnce() -> CacheEvent,
    {
        if !self.is_watching(key) {
            return 0;
        }
        self.notify(&build())
    }

    // == Notify ==
    /// Delivers an event to key subscribers, then global subscribers.
    ///
    /// Each callback runs in isolation: an error or panic is logged and the
    /// remaining subscribers still receive the event. Returns the number of
    /// successful deliveries.
    pub fn notify(&self, event: &CacheEvent) -> usize {
        if !self.is_watching(&event.key) {
            return 0;
        }

        // Snapshot under the lock, call outside it so callbacks may (un)subscribe
        let mut targets: Vec<Subscriber> = self
            .keyed
            .read()
            .get(&event.key)
            .map(|list| list.iter().map(|(_, s)| Arc::clone(s)).collect())
            .unwrap_or_default();
        targets.extend(self.global.read().iter().map(|(_, s)| Arc::clone(s)));

        let mut delivered = 0;
        for subscriber in targets {
            match catch_unwind(AssertUnwindSafe(|| subscriber(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %event.key, kind = ?event.kind, error = %err, "cache subscriber failed");
                }
                Err(_) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %event.key, kind = ?event.kind, "cache subscriber panicked");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("watched_keys", &self.watched_keys())
            .field("global", &self.global.read().len())
            .finish()
    }
}
