//! Lattice Store
//!
//! This crate provides batched reactive state stores for the Lattice
//! reactive UI framework. It implements:
//!
//! - Batched writes, committed once per scheduler tick
//! - Memoized getters, invalidated on every commit
//! - Global and per-field watchers that see `(old, new)` snapshots
//! - `patch`, `reset` and explicit store registries
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `state`: The state tree and its snapshot helpers
//! - `reactive`: Batching proxy, getter cache, watchers and scheduler
//! - `store`: Store handles, configuration and the registry
//! - `error`: Error types shared by all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use lattice_store::{StoreConfig, StoreRegistry};
//! use serde_json::{json, Value};
//!
//! let registry = StoreRegistry::new();
//! let counter = registry.define(
//!     StoreConfig::new("counter", || json!({ "count": 0 }))
//!         .getter("double", |state, _| {
//!             json!(state.get("count").and_then(Value::as_i64).unwrap_or(0) * 2)
//!         }),
//! )?;
//!
//! let store = counter.use_store()?;
//! store.subscribe(|old, new| println!("{old:?} -> {new:?}"));
//!
//! // Two writes, one commit
//! store.state().set("count", json!(1))?;
//! store.state().set("count", json!(2))?;
//! registry.run_until_idle();
//! // Prints once: {"count": 0} -> {"count": 2}
//!
//! assert_eq!(store.getter("double")?, json!(4));
//! ```

pub mod error;
pub mod reactive;
pub mod state;
pub mod store;

pub use error::{Result, StoreError};
pub use reactive::{
    BatchStatus, Commit, DispatchReport, GetterState, Scheduler, SchedulerConfig, StateProxy,
    Subscription, WatcherId,
};
pub use state::State;
pub use store::{ActionFn, StateFactory, Store, StoreConfig, StoreDefinition, StoreRegistry};
