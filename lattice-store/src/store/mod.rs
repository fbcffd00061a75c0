//! Stores
//!
//! A [`Store`] bundles an id, a batched live state, memoized getters,
//! actions and commit watchers into one handle.
//!
//! # Commit Flow
//!
//! 1. Writes (direct, `patch` or `reset`) go through the store's
//!    [`StateProxy`], which batches them per tick.
//!
//! 2. When the scheduler drains, the proxy commits the batch once.
//!
//! 3. The commit handler invalidates the getter cache, then runs global
//!    watchers, then field watchers for each changed field.
//!
//! # Isolation
//!
//! The state factory's output is copied twice at construction: once into
//! the initial snapshot used by `reset`, once into the live state. Neither
//! aliases the other or anything the caller holds.

mod config;
mod registry;

pub use config::{ActionFn, StateFactory, StoreConfig};
pub use registry::{StoreDefinition, StoreRegistry};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::{value_kind, Result, StoreError};
use crate::reactive::{
    Commit, CommitHandler, GetterCache, Scheduler, StateProxy, Subscription, WatchTarget,
    WatcherRegistry,
};
use crate::state::{clone_deep, State};

/// A reactive state container.
///
/// Cloning a store yields another handle to the same instance.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    id: String,
    initial: State,
    state: StateProxy,
    getters: Arc<GetterCache<Store>>,
    actions: IndexMap<String, ActionFn>,
    watchers: Arc<WatcherRegistry>,
}

impl Store {
    /// Build a store from `config`, deferring its commits to `scheduler`.
    ///
    /// This does not consult any registry; see [`StoreRegistry::define`]
    /// for deduplicated stores.
    pub fn new(config: &StoreConfig, scheduler: Scheduler) -> Result<Self> {
        let initial = config.produce_state()?;
        let live = clone_deep(&initial);

        let getters = Arc::new(GetterCache::new(config.getters.clone()));
        let watchers = Arc::new(WatcherRegistry::new(config.id.clone()));
        let on_commit = commit_handler(config.id.clone(), &getters, &watchers);

        debug!(
            store = %config.id,
            fields = initial.len(),
            getters = getters.len(),
            actions = config.actions.len(),
            "store created"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                id: config.id.clone(),
                initial,
                state: StateProxy::new(config.id.clone(), live, scheduler, on_commit),
                getters,
                actions: config.actions.clone(),
                watchers,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The live state. All writes go through it.
    pub fn state(&self) -> &StateProxy {
        &self.inner.state
    }

    /// Deep copy of the live state.
    pub fn snapshot(&self) -> State {
        self.inner.state.snapshot()
    }

    /// Deserialize the live state into a typed view.
    pub fn state_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.inner.state.read(State::deserialize::<T>)
    }

    /// Deep copy of the initial state.
    pub fn initial_state(&self) -> State {
        clone_deep(&self.inner.initial)
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.inner.state.scheduler()
    }

    /// Commit the pending batch now. Returns whether there was one.
    pub fn flush(&self) -> bool {
        self.inner.state.flush()
    }

    // ------------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------------

    /// Read a getter, computing it if no commit has happened since it was
    /// last computed.
    pub fn getter(&self, name: &str) -> Result<Value> {
        self.inner
            .getters
            .get(name, || self.inner.state.snapshot_shallow(), self)
    }

    /// Read a getter into a typed value.
    pub fn getter_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.getter(name)?)?)
    }

    /// Getter names in declaration order.
    pub fn getter_names(&self) -> impl Iterator<Item = &str> {
        self.inner.getters.names()
    }

    /// The store's getter cache.
    pub fn getters(&self) -> &GetterCache<Store> {
        &self.inner.getters
    }

    // ------------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------------

    /// Run an action with this store as its receiver.
    ///
    /// The action may read and write the store freely, including from
    /// inside [`StateProxy::update`] closures.
    pub fn dispatch(&self, action: &str, payload: Value) -> Result<()> {
        let run = self
            .inner
            .actions
            .get(action)
            .ok_or_else(|| StoreError::UnknownAction(action.to_string()))?;
        trace!(store = %self.inner.id, action, "dispatching action");
        run(self, payload)
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.inner.actions.contains_key(action)
    }

    /// Action names in declaration order.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.inner.actions.keys().map(String::as_str)
    }

    // ------------------------------------------------------------------------
    // Patch / reset
    // ------------------------------------------------------------------------

    /// Write several fields at once.
    ///
    /// `partial` must be a JSON object whose keys are all existing fields.
    /// Keys are validated before anything is written, so an unknown key
    /// leaves the state untouched. Writes join the current batch like any
    /// other write.
    pub fn patch(&self, partial: Value) -> Result<()> {
        let partial = match partial {
            Value::Object(map) => map,
            other => return Err(StoreError::InvalidPatch(value_kind(&other))),
        };

        if let Some(field) = partial.keys().find(|field| !self.inner.state.contains(field)) {
            return Err(StoreError::unknown_field(field.as_str()));
        }

        for (field, value) in partial {
            self.inner.state.set(&field, value)?;
        }
        Ok(())
    }

    /// Patch from any value that serializes to a JSON object.
    pub fn patch_with<T: Serialize + ?Sized>(&self, partial: &T) -> Result<()> {
        self.patch(serde_json::to_value(partial)?)
    }

    /// Restore every field to a fresh copy of its initial value.
    pub fn reset(&self) -> Result<()> {
        for (field, value) in self.inner.initial.iter() {
            self.inner.state.set(field, value.clone())?;
        }
        Ok(())
    }

    /// Restore the named fields to fresh copies of their initial values.
    ///
    /// An unknown name fails with [`StoreError::UnknownField`] before any
    /// field is reset.
    pub fn reset_fields<I, S>(&self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<S> = fields.into_iter().collect();
        let names: Vec<&str> = fields.iter().map(|field| field.as_ref()).collect();
        if let Some(field) = names
            .iter()
            .find(|field| !self.inner.initial.contains(field))
        {
            return Err(StoreError::unknown_field(*field));
        }

        for field in names {
            if let Some(value) = self.inner.initial.get(field) {
                self.inner.state.set(field, value.clone())?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------------

    /// Watch every commit. The watcher receives `(old, new)` state.
    pub fn subscribe<F>(&self, watcher: F) -> Subscription
    where
        F: Fn(&State, &State) + Send + Sync + 'static,
    {
        let id = self.inner.watchers.add_global(watcher);
        Subscription::new(id, WatchTarget::Global, Arc::downgrade(&self.inner.watchers))
    }

    /// Watch commits that wrote `field`. The watcher receives the field's
    /// `(old, new)` values.
    ///
    /// Watching a field the state does not have is allowed; the watcher
    /// simply never runs.
    pub fn subscribe_key<F>(&self, field: &str, watcher: F) -> Subscription
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        if !self.inner.state.contains(field) {
            debug!(store = %self.inner.id, field, "watching a field the state does not have");
        }
        let id = self.inner.watchers.add_key(field, watcher);
        Subscription::new(
            id,
            WatchTarget::Field(field.to_string()),
            Arc::downgrade(&self.inner.watchers),
        )
    }

    pub fn watchers(&self) -> &WatcherRegistry {
        &self.inner.watchers
    }

    /// Whether both handles point at the same store instance.
    pub fn ptr_eq(a: &Store, b: &Store) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

/// Build the handler that runs on every commit of a store.
fn commit_handler(
    id: String,
    getters: &Arc<GetterCache<Store>>,
    watchers: &Arc<WatcherRegistry>,
) -> CommitHandler {
    let getters = Arc::clone(getters);
    let watchers = Arc::clone(watchers);

    Arc::new(move |commit: Commit| {
        getters.invalidate();

        let report = watchers.dispatch(&commit.old, &commit.new, &commit.changed);

        if report.failed > 0 {
            warn!(
                store = %id,
                delivered = report.delivered,
                failed = report.failed,
                "some watchers failed during commit"
            );
        } else {
            trace!(store = %id, delivered = report.delivered, "commit dispatched");
        }
    })
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state)
            .field("getters", &self.inner.getters)
            .field("actions", &self.inner.actions.keys().collect::<Vec<_>>())
            .field("watchers", &self.inner.watchers)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
