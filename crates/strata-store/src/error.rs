//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Every public entry point recovers from these locally (the misuse is
/// logged and the operation degrades to a safe no-op); the `try_*`
/// variants surface them to callers that want the error value.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No accessors were supplied where at least one is required.
    #[error("at least one accessor must be specified")]
    EmptyAccessors,

    /// An accessor string failed strict syntax validation.
    #[error("invalid accessor {accessor:?}: {reason}")]
    InvalidAccessor {
        /// The offending accessor, verbatim.
        accessor: String,
        /// What the validator objected to.
        reason: &'static str,
    },

    /// A patch was supplied that is not a JSON object.
    #[error("patch must be an object, found {found}")]
    InvalidPatch {
        /// The JSON type name of the rejected value.
        found: &'static str,
    },

    /// An inbound sync payload could not be parsed.
    #[error("sync payload error: {0}")]
    Sync(#[from] serde_json::Error),
}

impl StoreError {
    /// Create an empty-accessors error.
    #[inline]
    pub fn empty_accessors() -> Self {
        StoreError::EmptyAccessors
    }

    /// Create an invalid-accessor error.
    #[inline]
    pub fn invalid_accessor(accessor: impl Into<String>, reason: &'static str) -> Self {
        StoreError::InvalidAccessor {
            accessor: accessor.into(),
            reason,
        }
    }

    /// Create an invalid-patch error.
    #[inline]
    pub fn invalid_patch(found: &'static str) -> Self {
        StoreError::InvalidPatch { found }
    }
}

/// Get the type name of a JSON value.
#[inline]
pub fn value_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
