//! Store-agnostic error type shared by every storage backend.

use thiserror::Error;

/// Errors that can occur during store operations.
///
/// Backends map their internal failures onto these variants so the queue
/// core handles them uniformly. `Unavailable` is the only fatal class:
/// callers must surface it and may not assume the write happened.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Store is unreachable (connection lost, service down).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The row exists but is not in a state that permits the operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal store error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// True if the operation may succeed on a later retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_and_conflict_are_retryable() {
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(StoreError::Conflict("claimed".into()).is_retryable());
        assert!(!StoreError::NotFound("gone".into()).is_retryable());
        assert!(!StoreError::Internal("bug".into()).is_retryable());
    }
}
