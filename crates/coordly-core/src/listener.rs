// ── Listener registry ──
//
// Callback subscriptions with add/remove semantics. Storage is a
// `DashMap` so registration never contends with a notification pass;
// notification works on a snapshot, so callbacks may add or remove
// listeners (including themselves) without deadlocking.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{error, trace};

type Callback = Box<dyn Fn() + Send + Sync>;

/// Identifier of one subscription. Monotonic per registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Listener {
    callback: Callback,
    context: Option<String>,
    /// Cleared on removal so a snapshot taken before the removal skips it.
    active: AtomicBool,
}

/// Something that owns listeners and can drop one by id.
pub(crate) trait Detach: Send + Sync {
    fn detach(&self, id: ListenerId);
}

// ── ListenerHandle ───────────────────────────────────────────────

/// Unsubscribe token returned by `add_listener`.
///
/// Holds only a weak reference to its owner: unsubscribing after the
/// owner is gone is a no-op. Dropping the handle does NOT unsubscribe.
#[must_use = "dropping the handle leaves the listener registered; keep it to unsubscribe"]
pub struct ListenerHandle {
    id: ListenerId,
    owner: Weak<dyn Detach>,
    detached: AtomicBool,
}

impl ListenerHandle {
    pub(crate) fn new(id: ListenerId, owner: Weak<dyn Detach>) -> Self {
        Self {
            id,
            owner,
            detached: AtomicBool::new(false),
        }
    }

    /// Remove the subscription. Idempotent.
    pub fn unsubscribe(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.detach(self.id);
        }
    }

    pub fn is_subscribed(&self) -> bool {
        !self.detached.load(Ordering::Acquire) && self.owner.strong_count() > 0
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}

// ── ListenerRegistry ─────────────────────────────────────────────

/// Ordered collection of callbacks, notified synchronously.
///
/// Registering the same callback twice yields two independent
/// subscriptions. Callbacks are invoked in registration order, but
/// consumers must not rely on that.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    name: String,
    listeners: DashMap<ListenerId, Arc<Listener>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name: name.into(),
                listeners: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a callback; the returned handle removes it again.
    pub fn add_listener<F>(&self, callback: F, context: Option<String>) -> ListenerHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.insert(Box::new(callback), context);
        let owner = Arc::downgrade(&self.inner) as Weak<dyn Detach>;
        ListenerHandle::new(id, owner)
    }

    /// Remove a subscription. Removing an already-removed handle is a no-op.
    pub fn remove_listener(&self, handle: &ListenerHandle) {
        handle.unsubscribe();
    }

    /// Invoke every registered callback.
    ///
    /// A panicking callback is logged and skipped; the remaining callbacks
    /// still run. Listeners added during the pass are first called on the
    /// next pass; listeners removed during the pass are not called.
    pub fn notify_all(&self) {
        let mut snapshot: Vec<(ListenerId, Arc<Listener>)> = self
            .inner
            .listeners
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);

        trace!(registry = %self.inner.name, count = snapshot.len(), "notifying listeners");

        for (id, listener) in snapshot {
            if !listener.active.load(Ordering::Acquire) {
                continue;
            }
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (listener.callback)())) {
                error!(
                    registry = %self.inner.name,
                    listener = %id,
                    panic = panic_message(payload.as_ref()),
                    "listener panicked during notification"
                );
            }
        }
    }

    /// Distinct contexts supplied by current listeners, sorted.
    pub fn contexts(&self) -> Vec<String> {
        let mut contexts: Vec<String> = self
            .inner
            .listeners
            .iter()
            .filter_map(|entry| entry.value().context.clone())
            .collect();
        contexts.sort_unstable();
        contexts.dedup();
        contexts
    }

    pub fn len(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.listeners.is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&self) {
        for entry in self.inner.listeners.iter() {
            entry.value().active.store(false, Ordering::Release);
        }
        self.inner.listeners.clear();
    }

    // ── Crate-internal plumbing for the coordinator ─────────────────

    pub(crate) fn insert(&self, callback: Callback, context: Option<String>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.insert(
            id,
            Arc::new(Listener {
                callback,
                context,
                active: AtomicBool::new(true),
            }),
        );
        id
    }

    /// Returns `true` if the id was registered.
    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        self.inner.remove(id)
    }
}

impl RegistryInner {
    fn remove(&self, id: ListenerId) -> bool {
        match self.listeners.remove(&id) {
            Some((_, listener)) => {
                listener.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }
}

impl Detach for RegistryInner {
    fn detach(&self, id: ListenerId) {
        self.remove(id);
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("name", &self.inner.name)
            .field("listeners", &self.len())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}
