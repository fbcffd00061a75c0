//! Store State
//!
//! A [`State`] is the field map a store owns: an ordered mapping from field
//! name to a JSON value. Field values may be nested objects or arrays.
//!
//! # Memory Layout
//!
//! Each field value lives behind an `Arc`. Values are never mutated in
//! place; a write swaps the field's `Arc` for a new one. This is what makes
//! a shallow copy a stable snapshot: it keeps the old `Arc`s alive while the
//! live state moves on.
//!
//! `Clone` on `State` is shallow. Use [`clone_deep`] when the copy must not
//! share anything with its source.

mod clone;

pub use clone::{clone_deep, clone_shallow};

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::{value_kind, Result, StoreError};

/// An ordered field map holding a store's data.
#[derive(Clone, Default, PartialEq)]
pub struct State {
    fields: IndexMap<String, Arc<Value>>,
}

impl State {
    /// Build a state from a JSON object.
    ///
    /// Any other kind of value is rejected with [`StoreError::InvalidState`].
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                fields: map
                    .into_iter()
                    .map(|(field, value)| (field, Arc::new(value)))
                    .collect(),
            }),
            other => Err(StoreError::InvalidState(value_kind(&other))),
        }
    }

    /// Build a state from any value that serializes to a JSON object.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Self::from_value(serde_json::to_value(value)?)
    }

    /// Get a field's value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).map(Arc::as_ref)
    }

    /// Check whether the state has a field.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Field names in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterate `(field, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .map(|(field, value)| (field.as_str(), value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy the state into a standalone JSON object.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .fields
            .iter()
            .map(|(field, value)| (field.clone(), Value::clone(value)))
            .collect();
        Value::Object(map)
    }

    /// Deserialize the state into a typed view.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_value())?)
    }

    /// The shared allocation behind a field.
    pub(crate) fn get_shared(&self, field: &str) -> Option<&Arc<Value>> {
        self.fields.get(field)
    }

    /// Replace an existing field's value.
    ///
    /// Returns the previous value, or `None` (leaving the state untouched)
    /// if the field does not exist. The field set never grows.
    pub(crate) fn replace(&mut self, field: &str, value: Value) -> Option<Arc<Value>> {
        self.fields
            .get_mut(field)
            .map(|slot| std::mem::replace(slot, Arc::new(value)))
    }

    /// Whether both states hold the very same allocation for `field`.
    #[cfg(test)]
    pub(crate) fn shares_field(&self, other: &State, field: &str) -> bool {
        match (self.fields.get(field), other.fields.get(field)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Whether two values are the same for change detection.
///
/// Structural equality, except that numbers compare by numeric value: `1`
/// and `1.0` are the same value.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x == y || matches!((x.as_f64(), y.as_f64()), (Some(x), Some(y)) if x == y)
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(field, value)| y.get(field).is_some_and(|other| same_value(value, other)))
        }
        _ => a == b,
    }
}

impl PartialEq<Value> for State {
    fn eq(&self, other: &Value) -> bool {
        match other {
            Value::Object(map) => {
                map.len() == self.fields.len()
                    && map
                        .iter()
                        .all(|(field, value)| self.get(field) == Some(value))
            }
            _ => false,
        }
    }
}

impl From<State> for Value {
    fn from(state: State) -> Self {
        state.to_value()
    }
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in self.iter() {
            map.serialize_entry(field, value)?;
        }
        map.end()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
