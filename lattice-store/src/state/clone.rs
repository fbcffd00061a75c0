//! Snapshot copies of a [`State`].
//!
//! A shallow copy shares every field allocation with its source. Since the
//! live state replaces field `Arc`s rather than mutating through them, a
//! shallow copy taken before a write still shows the pre-write values.
//!
//! A deep copy owns fresh allocations for every field, so nothing reachable
//! from it is shared with the store.

use std::sync::Arc;

use serde_json::Value;

use super::State;

/// Copy the field map, sharing field values with `state`.
pub fn clone_shallow(state: &State) -> State {
    state.clone()
}

/// Copy the field map and every value reachable from it.
pub fn clone_deep(state: &State) -> State {
    State {
        fields: state
            .fields
            .iter()
            .map(|(field, value)| (field.clone(), Arc::new(Value::clone(value))))
            .collect(),
    }
}
