//! Watcher Registry
//!
//! Holds the callbacks interested in a store's commits and fans each commit
//! out to them.
//!
//! # Ordering
//!
//! - Global watchers run in registration order, each with the same
//!   `(old, new)` snapshot pair.
//! - Field watchers run per changed field, fields in the order they were
//!   first written during the batch, watchers in registration order.
//!
//! # Failure Isolation
//!
//! A watcher that panics is caught, logged and counted in the returned
//! [`DispatchReport`]. The remaining watchers still run.
//!
//! # Concurrent Modification
//!
//! [`WatcherRegistry::dispatch`] copies every watcher list it needs before
//! the first callback runs. Watchers added or removed by a callback take
//! effect from the next commit on.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::error;

use super::proxy::ChangedFields;
use super::subscriber::WatcherId;
use crate::state::State;

/// Callback receiving the state before and after a commit.
pub type GlobalWatcher = Arc<dyn Fn(&State, &State) + Send + Sync>;

/// Callback receiving one field's value before and after a commit.
pub type KeyWatcher = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

type KeyWatchers = SmallVec<[(WatcherId, KeyWatcher); 2]>;

static NULL: Value = Value::Null;

/// Outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Watchers that returned normally.
    pub delivered: usize,
    /// Watchers that panicked.
    pub failed: usize,
}

impl DispatchReport {
    fn record(&mut self, ok: bool) {
        if ok {
            self.delivered += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl std::ops::Add for DispatchReport {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
        }
    }
}

/// Global and per-field commit watchers for one store.
pub struct WatcherRegistry {
    /// Store id, used in log output.
    label: String,
    global: RwLock<Vec<(WatcherId, GlobalWatcher)>>,
    keyed: RwLock<IndexMap<String, KeyWatchers>>,
}

impl WatcherRegistry {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            global: RwLock::new(Vec::new()),
            keyed: RwLock::new(IndexMap::new()),
        }
    }

    /// Register a global watcher.
    pub fn add_global<F>(&self, watcher: F) -> WatcherId
    where
        F: Fn(&State, &State) + Send + Sync + 'static,
    {
        let id = WatcherId::new();
        self.global.write().push((id, Arc::new(watcher)));
        id
    }

    /// Remove a global watcher. Returns whether it was registered.
    pub fn remove_global(&self, id: WatcherId) -> bool {
        let mut global = self.global.write();
        match global.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                global.remove(index);
                true
            }
            None => false,
        }
    }

    /// Register a watcher for one field.
    pub fn add_key<F>(&self, field: &str, watcher: F) -> WatcherId
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let id = WatcherId::new();
        self.keyed
            .write()
            .entry(field.to_string())
            .or_default()
            .push((id, Arc::new(watcher)));
        id
    }

    /// Remove a field watcher. Returns whether it was registered.
    ///
    /// A field whose last watcher is removed is dropped from the map.
    pub fn remove_key(&self, field: &str, id: WatcherId) -> bool {
        let mut keyed = self.keyed.write();
        let Some(watchers) = keyed.get_mut(field) else {
            return false;
        };
        let Some(index) = watchers.iter().position(|(existing, _)| *existing == id) else {
            return false;
        };
        watchers.remove(index);
        if watchers.is_empty() {
            keyed.shift_remove(field);
        }
        true
    }

    pub fn global_count(&self) -> usize {
        self.global.read().len()
    }

    pub fn key_count(&self, field: &str) -> usize {
        self.keyed.read().get(field).map_or(0, |watchers| watchers.len())
    }

    /// Fan one commit out to every watcher.
    ///
    /// Both the global and the field watcher lists are copied before the
    /// first callback runs, so registrations made or removed by a watcher
    /// only apply to later commits.
    pub fn dispatch(&self, old: &State, new: &State, changed: &ChangedFields) -> DispatchReport {
        let global = self.global_snapshot();
        let keyed = self.keyed_snapshot(changed);

        self.dispatch_global(global, old, new) + self.dispatch_keyed(keyed, old, new)
    }

    /// Invoke every global watcher with `(old, new)`.
    pub fn run_global(&self, old: &State, new: &State) -> DispatchReport {
        self.dispatch_global(self.global_snapshot(), old, new)
    }

    /// Invoke the watchers of every changed field with that field's
    /// `(old, new)` values.
    pub fn run_key(&self, old: &State, new: &State, changed: &ChangedFields) -> DispatchReport {
        self.dispatch_keyed(self.keyed_snapshot(changed), old, new)
    }

    fn global_snapshot(&self) -> Vec<(WatcherId, GlobalWatcher)> {
        self.global.read().clone()
    }

    fn keyed_snapshot<'a>(&self, changed: &'a ChangedFields) -> Vec<(&'a str, KeyWatchers)> {
        let keyed = self.keyed.read();
        changed
            .iter()
            .filter_map(|field| {
                keyed
                    .get(field)
                    .map(|watchers| (field.as_str(), watchers.clone()))
            })
            .collect()
    }

    fn dispatch_global(
        &self,
        watchers: Vec<(WatcherId, GlobalWatcher)>,
        old: &State,
        new: &State,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (id, watcher) in watchers {
            let ok = self.isolate(id, None, || watcher(old, new));
            report.record(ok);
        }
        report
    }

    fn dispatch_keyed(
        &self,
        passes: Vec<(&str, KeyWatchers)>,
        old: &State,
        new: &State,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (field, watchers) in passes {
            let old_value = old.get(field).unwrap_or(&NULL);
            let new_value = new.get(field).unwrap_or(&NULL);

            for (id, watcher) in watchers {
                let ok = self.isolate(id, Some(field), || watcher(old_value, new_value));
                report.record(ok);
            }
        }
        report
    }

    /// Run one watcher, catching a panic.
    fn isolate<F: FnOnce()>(&self, id: WatcherId, field: Option<&str>, call: F) -> bool {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(()) => true,
            Err(payload) => {
                error!(
                    store = %self.label,
                    watcher = id.raw(),
                    field = field.unwrap_or("*"),
                    panic = panic_message(payload.as_ref()),
                    "watcher panicked during dispatch"
                );
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl std::fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherRegistry")
            .field("store", &self.label)
            .field("global", &self.global_count())
            .field("keyed", &self.keyed.read().len())
            .finish()
    }
}
