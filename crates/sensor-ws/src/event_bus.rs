//! Name-keyed publish/subscribe bus.
//!
//! Consumers register callbacks under an event name and the connection
//! manager emits decoded payloads to them. Delivery is best-effort:
//!
//! - Callbacks run in registration order.
//! - The callback list is snapshotted when an emission starts. Callbacks added
//!   during that emission do not see it; callbacks removed during it still do.
//! - A panicking callback is caught, logged and reported to the failure hook.
//!   The remaining callbacks still run and `emit` itself never panics, even
//!   when the failure hook panics too.
//!
//! The subscriber map lock is only held while taking the snapshot or mutating
//! the map, never while a callback runs, so callbacks may freely subscribe,
//! unsubscribe or emit again.

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Subscriber callback. Identity (for [`EventBus::unsubscribe`]) is the `Arc` allocation.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Observability hook invoked with `(event, failure message)` when a callback panics.
pub type FailureHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct Registration {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
    failure_hook: RwLock<Option<FailureHook>>,
}

impl BusInner {
    fn remove_by_id(&self, event: &str, id: u64) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(list) = subscribers.get_mut(event) else {
            return false;
        };

        let before = list.len();
        list.retain(|r| r.id != id);
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(event);
        }
        removed
    }
}

/// Event bus shared between the connection manager and its consumers.
///
/// Cloning is cheap and every clone refers to the same subscriber map.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `event`.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_callback(event, Arc::new(callback))
    }

    /// Register an already shared callback, keeping its identity for
    /// [`EventBus::unsubscribe`].
    pub fn subscribe_callback(&self, event: &str, callback: Callback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, callback });

        trace!(event, id, "Subscriber registered");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            event: event.to_string(),
            id,
        }
    }

    /// Remove the first registration of `callback` under `event`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event: &str, callback: &Callback) -> bool {
        let id = {
            let subscribers = self.inner.subscribers.lock();
            subscribers.get(event).and_then(|list| {
                list.iter()
                    .find(|r| same_callback(&r.callback, callback))
                    .map(|r| r.id)
            })
        };

        match id {
            Some(id) => self.inner.remove_by_id(event, id),
            None => false,
        }
    }

    /// Deliver `payload` to every callback registered under `event`.
    pub fn emit(&self, event: &str, payload: &Value) {
        let snapshot: Vec<Callback> = {
            let subscribers = self.inner.subscribers.lock();
            match subscribers.get(event) {
                Some(list) => list.iter().map(|r| r.callback.clone()).collect(),
                None => return,
            }
        };

        trace!(event, subscribers = snapshot.len(), "Emitting event");

        for callback in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                let message = panic_message(&*panic);
                error!(event, %message, "Subscriber failed during emit");

                self.report_failure(event, &message);
            }
        }
    }

    /// Pass a subscriber failure to the hook. A panicking hook is logged and swallowed.
    fn report_failure(&self, event: &str, message: &str) {
        let hook = self.inner.failure_hook.read().clone();
        if let Some(hook) = hook {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| hook(event, message))) {
                error!(
                    event,
                    hook_message = %panic_message(&*panic),
                    "Failure hook panicked"
                );
            }
        }
    }

    /// Drop every registration under `event`.
    pub fn clear(&self, event: &str) {
        self.inner.subscribers.lock().remove(event);
    }

    /// Drop every registration.
    pub fn clear_all(&self) {
        self.inner.subscribers.lock().clear();
    }

    /// Number of callbacks registered under `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Install the hook that is told about subscriber failures.
    pub fn set_failure_hook(&self, hook: FailureHook) {
        *self.inner.failure_hook.write() = Some(hook);
    }
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping the handle keeps the subscription alive; call
/// [`Subscription::unsubscribe`] to revoke it. Revoking is idempotent and is a
/// no-op once the bus is gone or the event has been cleared.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Remove exactly this registration.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_by_id(&self.event, self.id);
        }
    }

    /// Event this subscription listens to.
    pub fn event(&self) -> &str {
        &self.event
    }
}

fn same_callback(a: &Callback, b: &Callback) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
