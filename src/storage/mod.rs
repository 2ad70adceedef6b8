//! Storage layer: durable job, log, dead-letter, and alert-config state.
//!
//! The abstraction is split into two traits:
//!
//! - [`QueueStore`]: the hot path (enqueue, claim, outcome reporting, logs)
//! - [`ControlStore`]: dead-letter management, alert configuration, and the
//!   aggregate metrics the alert monitor reads
//!
//! Backends implementing both get the [`Store`] super-trait for free. Two
//! implementations ship with the crate: [`PostgresStore`], the durable
//! store whose claim relies on `FOR UPDATE SKIP LOCKED`, and
//! [`InMemoryStore`] for tests and single-process development.
//!
//! Every query that touches tenant-scoped rows takes the tenant filter as an
//! explicit argument; isolation is enforced at the query boundary rather
//! than by the database.

mod error;
mod memory;

#[cfg(feature = "postgres")]
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::alerts::AlertThresholdConfig;
use crate::dlq::{DlqEntry, DlqStatus};
use crate::job::{Job, JobLogEntry, NewLogEntry, TenantId};

pub use error::StoreError;
pub use memory::InMemoryStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Outcome of a dead-letter move.
#[derive(Debug, Clone)]
pub struct DlqMove {
    pub entry: DlqEntry,
    /// False when the job had already been moved and this call was a no-op.
    pub created: bool,
}

/// Filters for listing dead-letter entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct DlqFilter {
    pub tenant_id: Option<TenantId>,
    pub status: Option<DlqStatus>,
}

impl DlqFilter {
    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn status(mut self, status: DlqStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Per-status job counts, scoped to a tenant or the whole queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub retrying: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub moved_to_dlq: u64,
}

/// Terminal outcomes observed inside a trailing window.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureWindow {
    pub succeeded: u64,
    pub failed: u64,
}

impl FailureWindow {
    /// Share of terminal outcomes that failed, as a percentage. Zero when
    /// the window is empty.
    pub fn failure_rate(&self) -> f64 {
        let total = self.succeeded + self.failed;
        if total == 0 {
            0.0
        } else {
            self.failed as f64 / total as f64 * 100.0
        }
    }
}

/// Hot-path store operations: enqueue, claim, outcome reporting, logs.
///
/// Implementations must make [`claim_next`](QueueStore::claim_next) safe
/// under arbitrary concurrent invocation: exactly one caller wins any given
/// job, and a losing caller is handed a different candidate (or `None`)
/// instead of blocking behind the winner.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new job row. The job must be `Pending`.
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Atomically claim the next eligible job for `worker_id`.
    ///
    /// Eligible means `status ∈ {pending, retrying}` and `scheduled_for ≤
    /// now`, optionally restricted to `allowed_job_types`. Candidates are
    /// ordered by priority (highest first), tie-broken by earliest
    /// `scheduled_for`. Returns `None` when nothing is eligible; that is
    /// the idle signal, not an error.
    async fn claim_next(
        &self,
        worker_id: &str,
        allowed_job_types: Option<&[String]>,
    ) -> Result<Option<Job>, StoreError>;

    /// Transition a `processing` job to `completed` and stamp the result.
    async fn mark_completed(
        &self,
        job_id: Uuid,
        result: Option<Value>,
        worker_id: &str,
    ) -> Result<Job, StoreError>;

    /// Record a failed attempt and reschedule: `retrying`, `retry_count + 1`,
    /// claimable again at `scheduled_for`.
    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    /// Record a final failed attempt: `failed`, error detail stamped,
    /// awaiting dead-letter handoff.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
    ) -> Result<Job, StoreError>;

    /// Flip a `pending`/`retrying` job to `cancelled`. Jobs already claimed
    /// cannot be cancelled; the store reports `Conflict`.
    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError>;

    /// Append one immutable line to the job's trail.
    async fn append_log(&self, entry: NewLogEntry) -> Result<JobLogEntry, StoreError>;

    async fn list_logs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobLogEntry>, StoreError>;
}

/// Dead-letter management, alert configuration, and aggregate metrics.
#[async_trait]
pub trait ControlStore: Send + Sync {
    /// Snapshot a `failed` job into the DLQ and stamp it `moved_to_dlq`.
    ///
    /// Idempotent: a second call for the same job returns the existing
    /// entry with `created = false` and mutates nothing.
    async fn move_job_to_dlq(&self, job_id: Uuid) -> Result<DlqMove, StoreError>;

    async fn get_dlq_entry(&self, entry_id: Uuid) -> Result<Option<DlqEntry>, StoreError>;

    async fn list_dlq(
        &self,
        filter: DlqFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, StoreError>;

    /// Insert the replacement job and flip the entry to `reprocessing`
    /// (incrementing `reprocess_attempts`) in one atomic step.
    async fn begin_reprocess(
        &self,
        entry_id: Uuid,
        replacement: &Job,
    ) -> Result<DlqEntry, StoreError>;

    /// Close an entry as `resolved` or `abandoned` with operator notes.
    async fn close_dlq_entry(
        &self,
        entry_id: Uuid,
        status: DlqStatus,
        notes: Option<&str>,
    ) -> Result<DlqEntry, StoreError>;

    /// Create or update the threshold keyed by `(tenant_id, alert_type)`.
    async fn upsert_alert_threshold(
        &self,
        config: &AlertThresholdConfig,
    ) -> Result<(), StoreError>;

    async fn list_alert_thresholds(&self) -> Result<Vec<AlertThresholdConfig>, StoreError>;

    /// Per-status job counts; `None` covers every tenant plus system jobs.
    async fn queue_stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, StoreError>;

    /// Terminal outcomes whose completion timestamp falls in `[since, now]`.
    async fn failure_stats(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError>;

    /// Dead-letter entries created at or after `since`.
    async fn dlq_growth(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Jobs currently waiting to be claimed (`pending` or `retrying`).
    async fn queue_depth(&self, tenant_id: Option<TenantId>) -> Result<u64, StoreError>;
}

/// Combined trait for full-featured stores.
pub trait Store: QueueStore + ControlStore {}

impl<T: QueueStore + ControlStore> Store for T {}
