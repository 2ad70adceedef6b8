//! Crate-level error type for queue operations.

use thiserror::Error;
use uuid::Uuid;

use crate::storage::StoreError;

/// Errors surfaced by the queue core to producers, workers, and operators.
///
/// Storage-layer failures are wrapped transparently; everything else is a
/// contract violation detected before any row is written or mutated.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Priority outside the accepted 1..=10 range.
    #[error("invalid priority {0}: must be between 1 and 10")]
    InvalidPriority(i16),

    /// Referenced job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(Uuid),

    /// Referenced dead-letter entry does not exist.
    #[error("dead-letter entry not found: {0}")]
    DlqEntryNotFound(Uuid),

    /// No handler registered for a claimed job's type.
    #[error("no handler registered for job type '{0}'")]
    HandlerMissing(String),

    /// The worker engine was started twice.
    #[error("worker engine is already running")]
    AlreadyRunning,

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
