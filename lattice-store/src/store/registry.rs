//! Store Registry
//!
//! The registry deduplicates stores by id. It is an explicit object rather
//! than process-wide state: each application (or test) owns its own
//! registry, and registries never see each other's stores.
//!
//! # How It Works
//!
//! 1. [`StoreRegistry::define`] reserves an id and returns a
//!    [`StoreDefinition`]. Defining an id that is already defined or already
//!    has a live store fails with [`StoreError::DuplicateStore`].
//!
//! 2. [`StoreDefinition::use_store`] returns the live store for the id,
//!    building and registering it on first use. Every later call returns
//!    the same instance.
//!
//! 3. [`StoreRegistry::remove`] forgets a store and its definition; the
//!    next `use_store` on an old definition builds a fresh instance.
//!
//! Every store built by a registry shares the registry's [`Scheduler`], so
//! one call to [`StoreRegistry::run_until_idle`] commits all of them.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::{Store, StoreConfig};
use crate::error::{Result, StoreError};
use crate::reactive::{Scheduler, SchedulerConfig};

/// Id-keyed set of live stores sharing one scheduler.
pub struct StoreRegistry {
    scheduler: Scheduler,
    stores: RwLock<HashMap<String, Store>>,
    defined: Mutex<HashSet<String>>,
}

impl StoreRegistry {
    /// Create a registry with a default scheduler.
    pub fn new() -> Arc<Self> {
        Self::with_scheduler(Scheduler::new())
    }

    /// Create a registry whose scheduler uses `config`.
    pub fn with_config(config: SchedulerConfig) -> Arc<Self> {
        Self::with_scheduler(Scheduler::with_config(config))
    }

    /// Create a registry on an existing scheduler.
    pub fn with_scheduler(scheduler: Scheduler) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            stores: RwLock::new(HashMap::new()),
            defined: Mutex::new(HashSet::new()),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Drain the shared scheduler, committing every pending batch.
    pub fn run_until_idle(&self) -> usize {
        self.scheduler.run_until_idle()
    }

    /// Reserve `config.id` and return a handle that builds the store on
    /// first use.
    pub fn define(self: &Arc<Self>, config: StoreConfig) -> Result<StoreDefinition> {
        let mut defined = self.defined.lock();
        if defined.contains(&config.id) || self.has(&config.id) {
            return Err(StoreError::DuplicateStore(config.id));
        }
        defined.insert(config.id.clone());
        debug!(store = %config.id, "store defined");

        Ok(StoreDefinition {
            registry: Arc::clone(self),
            config: Arc::new(config),
        })
    }

    /// Get a live store.
    pub fn get(&self, id: &str) -> Option<Store> {
        self.stores.read().get(id).cloned()
    }

    /// Check whether a live store exists for `id`.
    pub fn has(&self, id: &str) -> bool {
        self.stores.read().contains_key(id)
    }

    /// Register a store under its id, returning any store it replaced.
    pub fn insert(&self, store: Store) -> Option<Store> {
        self.stores.write().insert(store.id().to_string(), store)
    }

    /// Forget a store and its definition.
    pub fn remove(&self, id: &str) -> Option<Store> {
        let removed = self.stores.write().remove(id);
        let was_defined = self.defined.lock().remove(id);
        if removed.is_some() || was_defined {
            debug!(store = id, "store removed");
        }
        removed
    }

    /// Forget every store and definition.
    pub fn clear(&self) {
        self.stores.write().clear();
        self.defined.lock().clear();
        debug!("registry cleared");
    }

    /// Number of live stores.
    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.read().is_empty()
    }

    /// Ids of live stores, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn get_or_create(&self, config: &StoreConfig) -> Result<Store> {
        if let Some(store) = self.get(&config.id) {
            return Ok(store);
        }

        // The factory is user code; build outside the lock.
        let store = Store::new(config, self.scheduler.clone())?;

        let mut stores = self.stores.write();
        Ok(stores
            .entry(config.id.clone())
            .or_insert(store)
            .clone())
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.ids())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// A defined store id, resolving to one shared instance.
#[derive(Clone)]
pub struct StoreDefinition {
    registry: Arc<StoreRegistry>,
    config: Arc<StoreConfig>,
}

impl StoreDefinition {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Get the store, building it on first use.
    pub fn use_store(&self) -> Result<Store> {
        self.registry.get_or_create(&self.config)
    }
}

impl fmt::Debug for StoreDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreDefinition")
            .field("config", &self.config)
            .finish()
    }
}
