//! Getter Cache
//!
//! A getter is a derived value computed from a store's state. The cache
//! computes each getter lazily and memoizes the result until the next
//! commit.
//!
//! # How Getters Work
//!
//! 1. On first read, the getter runs its computation and caches the result.
//!
//! 2. Further reads return the cached value without recomputing.
//!
//! 3. Every commit calls [`GetterCache::invalidate`], which marks all getters
//!    dirty. There is no per-field dependency tracking: any committed change
//!    invalidates everything.
//!
//! 4. The next read of a dirty getter recomputes it.
//!
//! # Staleness
//!
//! Invalidation bumps an epoch. A computation that started before an
//! invalidation still returns its value to the caller but is not memoized,
//! so the cache never holds a value computed from pre-commit state.
//!
//! # Views
//!
//! The cache is generic over the view `V` passed to computations alongside
//! the state. Stores pass themselves, so one getter can read another.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use super::context::ComputeContext;
use crate::error::{Result, StoreError};
use crate::state::State;

/// A getter computation.
pub type GetterFn<V> = Arc<dyn Fn(&State, &V) -> Value + Send + Sync>;

/// Dirty state for a getter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetterState {
    /// The cached value is up-to-date.
    Clean,

    /// The getter must recompute on next read.
    Dirty,
}

#[derive(Debug, Clone)]
struct Slot {
    value: Option<Value>,
    state: GetterState,
}

impl Slot {
    fn dirty() -> Self {
        Self {
            value: None,
            state: GetterState::Dirty,
        }
    }
}

/// Lazily computed, memoized getters for one store.
pub struct GetterCache<V> {
    /// Identity used by cycle detection.
    id: u64,

    /// Getter computations, in declaration order.
    getters: IndexMap<String, GetterFn<V>>,

    /// One slot per getter, indexed like `getters`.
    slots: Mutex<Vec<Slot>>,

    /// Bumped on every invalidation.
    epoch: AtomicU64,

    /// Total computations run.
    computations: AtomicU64,
}

impl<V> GetterCache<V> {
    pub fn new(getters: IndexMap<String, GetterFn<V>>) -> Self {
        static CACHE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

        let slots = vec![Slot::dirty(); getters.len()];
        Self {
            id: CACHE_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            getters,
            slots: Mutex::new(slots),
            epoch: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Read a getter, computing it if it is dirty.
    ///
    /// `state` is only called when a computation is needed.
    pub fn get<S>(&self, name: &str, state: S, view: &V) -> Result<Value>
    where
        S: FnOnce() -> State,
    {
        let (index, _, compute) = self
            .getters
            .get_full(name)
            .ok_or_else(|| StoreError::UnknownGetter(name.to_string()))?;

        let epoch = {
            let slots = self.slots.lock();
            let slot = &slots[index];
            if slot.state == GetterState::Clean {
                if let Some(value) = &slot.value {
                    trace!(getter = name, "getter cache hit");
                    return Ok(value.clone());
                }
            }
            self.epoch.load(Ordering::Acquire)
        };

        let _ctx = ComputeContext::enter(self.id, name)
            .ok_or_else(|| StoreError::GetterCycle(name.to_string()))?;

        let value = compute(&state(), view);
        self.computations.fetch_add(1, Ordering::Relaxed);

        let mut slots = self.slots.lock();
        if self.epoch.load(Ordering::Acquire) == epoch {
            slots[index] = Slot {
                value: Some(value.clone()),
                state: GetterState::Clean,
            };
        } else {
            trace!(getter = name, "discarding value computed before invalidation");
        }

        Ok(value)
    }

    /// Forget every cached value.
    pub fn invalidate(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            *slot = Slot::dirty();
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
        debug!(getters = slots.len(), "getter cache invalidated");
    }

    /// Current dirty state of a getter.
    pub fn state(&self, name: &str) -> Option<GetterState> {
        let index = self.getters.get_index_of(name)?;
        Some(self.slots.lock()[index].state)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.getters.contains_key(name)
    }

    /// Getter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.getters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.getters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }

    /// Total number of computations run by this cache.
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }
}

impl<V> fmt::Debug for GetterCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetterCache")
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("computations", &self.computations())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
