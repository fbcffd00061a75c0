//! Watcher identities and unsubscribe handles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

use super::watchers::WatcherRegistry;

/// Unique identifier for a watcher registration.
///
/// Registering the same callback twice yields two ids; each removal takes
/// out exactly one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a watcher is registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchTarget {
    Global,
    Field(String),
}

/// Handle returned by `subscribe` / `subscribe_key`.
///
/// Dropping the handle leaves the watcher registered. Call
/// [`Subscription::unsubscribe`] to remove it; calling it again is a no-op.
pub struct Subscription {
    id: WatcherId,
    target: WatchTarget,
    registry: Weak<WatcherRegistry>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: WatcherId, target: WatchTarget, registry: Weak<WatcherRegistry>) -> Self {
        Self {
            id,
            target,
            registry,
            active: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// The field this subscription watches, or `None` for a global watcher.
    pub fn field(&self) -> Option<&str> {
        match &self.target {
            WatchTarget::Global => None,
            WatchTarget::Field(field) => Some(field),
        }
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the watcher. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match &self.target {
            WatchTarget::Global => registry.remove_global(self.id),
            WatchTarget::Field(field) => registry.remove_key(field, self.id),
        };
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("active", &self.is_active())
            .finish()
    }
}
