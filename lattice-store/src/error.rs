//! Error types for store operations.

use serde_json::Value;
use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while defining, reading or mutating a store.
///
/// Validation errors are returned synchronously to the caller of the
/// operation that triggered them. Watcher panics never surface here; they
/// are isolated and logged during dispatch.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store with this id was already defined in the registry.
    #[error("store with id `{0}` already exists")]
    DuplicateStore(String),

    /// A write, patch or reset named a field the state does not have.
    #[error("state does not include property `{field}`")]
    UnknownField {
        /// The offending field name.
        field: String,
    },

    /// The store has no getter with this name.
    #[error("store does not define a getter named `{0}`")]
    UnknownGetter(String),

    /// The store has no action with this name.
    #[error("store does not define an action named `{0}`")]
    UnknownAction(String),

    /// A getter read itself while it was being computed.
    #[error("getter `{0}` depends on itself")]
    GetterCycle(String),

    /// The state factory produced something other than an object.
    #[error("state must be a JSON object, got {0}")]
    InvalidState(&'static str),

    /// A patch payload was not an object.
    #[error("patch payload must be a JSON object, got {0}")]
    InvalidPatch(&'static str),

    /// An action reported a failure.
    #[error("action `{action}` failed: {message}")]
    Action {
        /// Name of the failing action.
        action: String,
        /// What went wrong.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an unknown field error.
    #[inline]
    pub fn unknown_field(field: impl Into<String>) -> Self {
        StoreError::UnknownField {
            field: field.into(),
        }
    }

    /// Create an action failure error.
    #[inline]
    pub fn action(action: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Action {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Short name of a JSON value's kind, for error messages.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
