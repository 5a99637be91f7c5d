//! In-process publish/subscribe for received events.
//!
//! Callbacks run on the task that delivered the event, outside any registry
//! lock, so a callback may subscribe or unsubscribe. A panicking callback is
//! logged and does not affect the others.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use beacon_engine::{SubscriptionFilter, SyncEvent};
use parking_lot::RwLock;

/// Identifier of a subscription.
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: SubscriptionFilter,
    callback: Callback,
    active: AtomicBool,
    delivered: AtomicU64,
}

#[derive(Default)]
struct RegistryInner {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter().position(|s| s.id == id) {
            Some(index) => {
                subs.remove(index).active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

/// The subscription table. Clones share the same table.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events matching `filter`.
    ///
    /// The subscription lives until the returned handle is dropped or
    /// [`SubscriptionHandle::unsubscribe`] is called.
    pub fn subscribe<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriptionHandle
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.subscriptions.write().push(Arc::new(Subscription {
            id,
            filter,
            callback: Arc::new(callback),
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
        }));
        tracing::trace!(subscription_id = id, "Subscription added");

        SubscriptionHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove(id)
    }

    /// Deliver `event` to every matching subscription. Returns the number of
    /// callbacks that completed.
    pub fn notify(&self, event: &SyncEvent) -> usize {
        let snapshot: Vec<Arc<Subscription>> = self.inner.subscriptions.read().clone();

        let mut delivered = 0;
        for sub in snapshot {
            if !sub.active.load(Ordering::SeqCst) || !sub.filter.matches(event) {
                continue;
            }
            // Limit is a soft ceiling: the subscription stays registered.
            if !sub.filter.has_capacity(sub.delivered.load(Ordering::SeqCst)) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(event))) {
                Ok(()) => {
                    sub.delivered.fetch_add(1, Ordering::SeqCst);
                    delivered += 1;
                }
                Err(_) => {
                    tracing::error!(
                        subscription_id = sub.id,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        "Subscriber callback panicked"
                    );
                }
            }
        }
        delivered
    }

    /// Events delivered to a subscription so far.
    pub fn delivered_count(&self, id: SubscriptionId) -> Option<u64> {
        self.inner
            .subscriptions
            .read()
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.delivered.load(Ordering::SeqCst))
    }

    pub fn len(&self) -> usize {
        self.inner.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Disposer for a subscription. Dropping it unsubscribes.
#[must_use = "dropping the handle unsubscribes immediately"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    registry: Weak<RegistryInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    /// Keep the subscription for the registry's lifetime.
    pub fn detach(self) -> SubscriptionId {
        let id = self.id;
        std::mem::forget(self);
        id
    }

    pub fn delivered_count(&self) -> u64 {
        self.registry
            .upgrade()
            .and_then(|inner| {
                inner
                    .subscriptions
                    .read()
                    .iter()
                    .find(|s| s.id == self.id)
                    .map(|s| s.delivered.load(Ordering::SeqCst))
            })
            .unwrap_or(0)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_engine::EventSource;
    use parking_lot::Mutex;
    use serde_json::json;

    fn event(id: &str, subject: Option<&str>, event_type: &str, timestamp: u64) -> SyncEvent {
        SyncEvent::new(
            id,
            event_type,
            json!({}),
            subject.map(str::to_string),
            timestamp,
            EventSource::Push,
            timestamp,
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&SyncEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e: &SyncEvent| sink.lock().push(e.id.clone()))
    }

    #[test]
    fn subject_filter_excludes_other_subjects_and_global_events() {
        let registry = SubscriptionRegistry::new();
        let (seen, cb) = recorder();
        let _handle = registry.subscribe(SubscriptionFilter::all().subject("ORD-1"), cb);

        registry.notify(&event("1", Some("ORD-2"), "stage_change", 1));
        registry.notify(&event("2", None, "stage_change", 2));
        registry.notify(&event("3", Some("ORD-1"), "stage_change", 3));

        assert_eq!(*seen.lock(), vec!["3"]);
    }

    #[test]
    fn type_and_since_filters() {
        let registry = SubscriptionRegistry::new();
        let (seen, cb) = recorder();
        let _handle = registry.subscribe(
            SubscriptionFilter::all()
                .event_types(["order_update"])
                .since(10),
            cb,
        );

        registry.notify(&event("old", None, "order_updated", 5));
        registry.notify(&event("other", None, "stage_change", 20));
        registry.notify(&event("hit", None, "order_updated", 20));

        assert_eq!(*seen.lock(), vec!["hit"]);
    }

    #[test]
    fn limit_is_a_soft_ceiling() {
        let registry = SubscriptionRegistry::new();
        let (seen, cb) = recorder();
        let handle = registry.subscribe(SubscriptionFilter::all().limit(2), cb);

        for n in 0..5 {
            registry.notify(&event(&n.to_string(), None, "x", n));
        }

        assert_eq!(seen.lock().len(), 2);
        assert_eq!(handle.delivered_count(), 2);
        // Still registered
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let registry = SubscriptionRegistry::new();
        let _bad = registry.subscribe(SubscriptionFilter::all(), |_| panic!("subscriber bug"));
        let (seen, cb) = recorder();
        let _good = registry.subscribe(SubscriptionFilter::all(), cb);

        assert_eq!(registry.notify(&event("1", None, "x", 1)), 1);
        assert_eq!(*seen.lock(), vec!["1"]);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let registry = SubscriptionRegistry::new();
        let (seen, cb) = recorder();
        let handle = registry.subscribe(SubscriptionFilter::all(), cb);
        assert_eq!(registry.len(), 1);

        handle.unsubscribe();
        assert!(registry.is_empty());
        registry.notify(&event("1", None, "x", 1));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn detached_subscription_stays() {
        let registry = SubscriptionRegistry::new();
        let (seen, cb) = recorder();
        let id = registry.subscribe(SubscriptionFilter::all(), cb).detach();

        registry.notify(&event("1", None, "x", 1));
        assert_eq!(registry.delivered_count(id), Some(1));
        assert!(registry.unsubscribe(id));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn callback_may_unsubscribe_during_notify() {
        let registry = SubscriptionRegistry::new();
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
        let inner_slot = slot.clone();
        let handle = registry.subscribe(SubscriptionFilter::all(), move |_| {
            inner_slot.lock().take();
        });
        *slot.lock() = Some(handle);

        registry.notify(&event("1", None, "x", 1));
        assert!(registry.is_empty());
    }
}
