//! State Proxy
//!
//! The proxy wraps a store's live state. Every write goes through it, which
//! lets it batch writes and hand each batch to a commit handler exactly once.
//!
//! # How Batching Works
//!
//! 1. The first effective write since the last commit opens a batch: it
//!    takes a shallow "before" snapshot, clears the changed-field set and
//!    enqueues one commit task on the scheduler.
//!
//! 2. Every effective write records its field in the changed set and is
//!    applied to the live state immediately. Readers always see current
//!    values; only watchers see the batched view.
//!
//! 3. When the commit task runs it takes a deep "after" snapshot, closes the
//!    batch and calls the handler with `(before, after, changed)`.
//!
//! A write of a value equal to the current one is a no-op; numbers compare
//! by value. A field that is
//! written and then set back to its original value within one batch is
//! still reported as changed.
//!
//! # Snapshots
//!
//! The "before" snapshot can be shallow because writes replace field
//! allocations instead of mutating them. The "after" snapshot is deep so
//! that watchers never hold an alias into the live state.
//!
//! # Re-entrancy
//!
//! The batch is closed before the handler runs. Writes issued from inside
//! the handler open a fresh batch with its own commit task. No lock is held
//! while the handler runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, trace, warn};

use super::context::ComputeContext;
use super::scheduler::Scheduler;
use crate::error::{Result, StoreError};
use crate::state::{clone_deep, clone_shallow, same_value, State};

/// Fields written during a batch, in first-write order.
pub type ChangedFields = IndexSet<String>;

/// One committed batch.
#[derive(Debug, Clone)]
pub struct Commit {
    /// State before the first write of the batch.
    pub old: State,
    /// State when the batch was committed.
    pub new: State,
    /// Fields written during the batch.
    pub changed: ChangedFields,
}

/// Receives every commit.
pub type CommitHandler = Arc<dyn Fn(Commit) + Send + Sync>;

/// Whether a proxy has uncommitted writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// No batch is open.
    Idle,
    /// Writes are waiting for the deferred commit.
    Pending,
}

/// Outcome of a single write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Written,
    Unchanged,
    /// The field changed since the caller read it.
    Stale,
}

#[derive(Default)]
struct Batch {
    pending: bool,
    before: State,
    changed: ChangedFields,
}

/// Write-intercepting wrapper around a store's live state.
///
/// Cloning a proxy yields another handle to the same state.
#[derive(Clone)]
pub struct StateProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    /// Store id, used in log output.
    label: String,
    state: RwLock<State>,
    batch: Mutex<Batch>,
    scheduler: Scheduler,
    on_commit: CommitHandler,
    commits: AtomicU64,
}

impl StateProxy {
    /// Wrap `state`, scheduling commits on `scheduler`.
    pub fn new(
        label: impl Into<String>,
        state: State,
        scheduler: Scheduler,
        on_commit: CommitHandler,
    ) -> Self {
        Self {
            inner: Arc::new(ProxyInner {
                label: label.into(),
                state: RwLock::new(state),
                batch: Mutex::new(Batch::default()),
                scheduler,
                on_commit,
                commits: AtomicU64::new(0),
            }),
        }
    }

    /// Current value of a field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.inner.state.read().get(field).cloned()
    }

    /// Run `f` against the live state.
    ///
    /// `f` runs under the state's read lock and must not write to this
    /// store.
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Deep copy of the live state.
    pub fn snapshot(&self) -> State {
        clone_deep(&self.inner.state.read())
    }

    /// Shallow copy of the live state, for read-only use.
    pub(crate) fn snapshot_shallow(&self) -> State {
        clone_shallow(&self.inner.state.read())
    }

    pub fn contains(&self, field: &str) -> bool {
        self.inner.state.read().contains(field)
    }

    /// Field names in declaration order.
    pub fn fields(&self) -> Vec<String> {
        self.inner.state.read().fields().map(str::to_string).collect()
    }

    /// Write a field.
    ///
    /// Returns `Ok(false)` if the value is the same as the current one
    /// (nothing is recorded or scheduled) and [`StoreError::UnknownField`]
    /// if the field is not part of the state. Numbers compare by value, so
    /// writing `1.0` over `1` is a no-op.
    pub fn set(&self, field: &str, value: Value) -> Result<bool> {
        self.apply(field, value, None).map(|applied| applied == Applied::Written)
    }

    /// Modify a field through a closure.
    ///
    /// `f` works on a copy of the current value and runs with no lock held,
    /// so it may read this store. The result is written back through the
    /// same path as [`StateProxy::set`]. If another write replaced the field
    /// while `f` ran, `f` is called again on the newer value.
    pub fn update<F>(&self, field: &str, mut f: F) -> Result<bool>
    where
        F: FnMut(&mut Value),
    {
        loop {
            let seen = self
                .inner
                .state
                .read()
                .get_shared(field)
                .cloned()
                .ok_or_else(|| StoreError::unknown_field(field))?;

            let mut next = Value::clone(&seen);
            f(&mut next);

            match self.apply(field, next, Some(&seen))? {
                Applied::Stale => {
                    trace!(store = %self.inner.label, field, "field replaced during update, retrying");
                }
                applied => return Ok(applied == Applied::Written),
            }
        }
    }

    /// Apply a write. With `expected`, the write only lands if the field
    /// still holds that allocation.
    fn apply(&self, field: &str, value: Value, expected: Option<&Arc<Value>>) -> Result<Applied> {
        if let Some(getter) = ComputeContext::current_getter() {
            warn!(
                store = %self.inner.label,
                field,
                getter = %getter,
                "state written while a getter is computing"
            );
        }

        let mut state = self.inner.state.write();
        let current = state
            .get_shared(field)
            .ok_or_else(|| StoreError::unknown_field(field))?;
        if let Some(expected) = expected {
            if !Arc::ptr_eq(current, expected) {
                return Ok(Applied::Stale);
            }
        }
        if same_value(current, &value) {
            trace!(store = %self.inner.label, field, "write is a no-op");
            return Ok(Applied::Unchanged);
        }

        {
            let mut batch = self.inner.batch.lock();
            if !batch.pending {
                batch.pending = true;
                batch.before = clone_shallow(&state);
                batch.changed.clear();
                self.schedule_commit();
                debug!(store = %self.inner.label, "batch opened");
            }
            batch.changed.insert(field.to_string());
        }

        state.replace(field, value);
        trace!(store = %self.inner.label, field, "field written");
        Ok(Applied::Written)
    }

    fn schedule_commit(&self) {
        let proxy = Arc::downgrade(&self.inner);
        self.inner.scheduler.enqueue(move || {
            if let Some(inner) = proxy.upgrade() {
                inner.commit();
            }
        });
    }

    /// Commit the pending batch now instead of waiting for the scheduler.
    ///
    /// Returns whether a batch was committed. The already-scheduled task
    /// will find nothing pending and do nothing.
    pub fn flush(&self) -> bool {
        self.inner.commit()
    }

    pub fn status(&self) -> BatchStatus {
        if self.inner.batch.lock().pending {
            BatchStatus::Pending
        } else {
            BatchStatus::Idle
        }
    }

    /// Fields written in the pending batch.
    pub fn changed_fields(&self) -> ChangedFields {
        self.inner.batch.lock().changed.clone()
    }

    /// Number of batches committed so far.
    pub fn commit_count(&self) -> u64 {
        self.inner.commits.load(Ordering::Acquire)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }
}

impl ProxyInner {
    fn commit(&self) -> bool {
        let commit = {
            // Same lock order as `apply`: state, then batch.
            let state = self.state.read();
            let mut batch = self.batch.lock();
            if !batch.pending {
                return false;
            }
            batch.pending = false;
            Commit {
                old: std::mem::take(&mut batch.before),
                new: clone_deep(&state),
                changed: std::mem::take(&mut batch.changed),
            }
        };

        self.commits.fetch_add(1, Ordering::AcqRel);
        debug!(store = %self.label, changed = ?commit.changed, "committing batch");
        (self.on_commit)(commit);
        true
    }
}

impl fmt::Debug for StateProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateProxy")
            .field("store", &self.inner.label)
            .field("state", &*self.inner.state.read())
            .field("status", &self.status())
            .field("commits", &self.commit_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
