//! Store configuration.
//!
//! A [`StoreConfig`] describes a store before it exists: its id, a factory
//! for its initial state, and the getters and actions it exposes.
//!
//! ```rust,ignore
//! let config = StoreConfig::new("counter", || json!({ "count": 0 }))
//!     .getter("double", |state, _| json!(state.get("count").and_then(Value::as_i64).unwrap_or(0) * 2))
//!     .action("inc", |store, by| {
//!         let by = by.as_i64().unwrap_or(1);
//!         store.state().update("count", |count| *count = json!(count.as_i64().unwrap_or(0) + by))?;
//!         Ok(())
//!     });
//! ```

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use super::Store;
use crate::error::Result;
use crate::reactive::GetterFn;
use crate::state::State;

/// Produces a fresh initial state.
pub type StateFactory = Arc<dyn Fn() -> Result<State> + Send + Sync>;

/// An action. Receives the store it runs on and a JSON payload.
pub type ActionFn = Arc<dyn Fn(&Store, Value) -> Result<()> + Send + Sync>;

/// Blueprint for a store.
#[derive(Clone)]
pub struct StoreConfig {
    pub(crate) id: String,
    pub(crate) state: StateFactory,
    pub(crate) getters: IndexMap<String, GetterFn<Store>>,
    pub(crate) actions: IndexMap<String, ActionFn>,
}

impl StoreConfig {
    /// Start a config from an id and a state factory.
    ///
    /// The factory may return any value that serializes to a JSON object;
    /// anything else fails store construction with
    /// [`StoreError::InvalidState`](crate::StoreError::InvalidState).
    pub fn new<F, T>(id: impl Into<String>, state: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Serialize,
    {
        Self {
            id: id.into(),
            state: Arc::new(move || State::from_serialize(&state())),
            getters: IndexMap::new(),
            actions: IndexMap::new(),
        }
    }

    /// Declare a getter. A later declaration with the same name replaces
    /// the earlier one.
    pub fn getter<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&State, &Store) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(compute));
        self
    }

    /// Declare an action. A later declaration with the same name replaces
    /// the earlier one.
    pub fn action<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&Store, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the state factory.
    pub(crate) fn produce_state(&self) -> Result<State> {
        (self.state)()
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("id", &self.id)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}
