//! Dead-letter queue: durable snapshots of jobs that exhausted their retry
//! budget, and the operator workflow for recovering them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::QueueError;
use crate::job::{Job, JobStatus, LogLevel, NewLogEntry, Priority, TenantId};
use crate::storage::{DlqFilter, Store};

/// Operator-facing lifecycle of a dead-letter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqStatus {
    /// Newly escalated, awaiting operator attention.
    Failed,
    /// A replacement job has been enqueued.
    Reprocessing,
    /// Closed: the underlying problem was fixed.
    Resolved,
    /// Closed: the work will not be re-attempted.
    Abandoned,
}

impl DlqStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DlqStatus::Failed => "failed",
            DlqStatus::Reprocessing => "reprocessing",
            DlqStatus::Resolved => "resolved",
            DlqStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<DlqStatus> {
        match value {
            "failed" => Some(DlqStatus::Failed),
            "reprocessing" => Some(DlqStatus::Reprocessing),
            "resolved" => Some(DlqStatus::Resolved),
            "abandoned" => Some(DlqStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DlqStatus::Resolved | DlqStatus::Abandoned)
    }
}

impl std::fmt::Display for DlqStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot copy of a job that exhausted its retries.
///
/// The original job row is preserved untouched (beyond its `moved_to_dlq`
/// stamp) as an immutable failure record; reprocessing always creates a
/// brand-new job from this snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    /// The job this entry snapshots. Unique: at most one entry per job.
    pub job_id: Uuid,
    pub job_type: String,
    pub job_name: String,
    pub tenant_id: Option<TenantId>,
    pub payload: Value,
    /// Priority the job carried when it failed.
    pub priority: Priority,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    /// Total failed attempts (the initial run plus every retry).
    pub failure_count: u32,
    pub status: DlqStatus,
    pub reprocess_attempts: u32,
    pub notes: Option<String>,
    pub moved_to_dlq_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DlqEntry {
    /// Build the snapshot for a job that just exhausted its retries.
    pub fn snapshot_of(job: &Job, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            job_type: job.job_type.clone(),
            job_name: job.job_name.clone(),
            tenant_id: job.tenant_id,
            payload: job.payload.clone(),
            priority: job.priority,
            max_retries: job.max_retries,
            timeout_seconds: job.timeout_seconds,
            error_message: job.error_message.clone(),
            error_stack: job.error_stack.clone(),
            failure_count: job.retry_count + 1,
            status: DlqStatus::Failed,
            reprocess_attempts: 0,
            notes: None,
            moved_to_dlq_at: now,
            updated_at: now,
        }
    }

    /// Build the replacement job enqueued by a reprocess: new identity,
    /// fresh retry budget, priority elevated above the original.
    pub(crate) fn replacement_job(&self, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: self.job_type.clone(),
            job_name: self.job_name.clone(),
            tenant_id: self.tenant_id,
            payload: self.payload.clone(),
            status: JobStatus::Pending,
            priority: self.priority.elevated(),
            result: None,
            error_message: None,
            error_stack: None,
            retry_count: 0,
            max_retries: self.max_retries,
            timeout_seconds: self.timeout_seconds,
            scheduled_for: now,
            claimed_by: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Moves exhausted jobs into the DLQ and drives operator recovery.
#[derive(Clone)]
pub struct DeadLetterManager {
    store: Arc<dyn Store>,
}

impl DeadLetterManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Snapshot a failed job into the DLQ and stamp it `moved_to_dlq`.
    ///
    /// Safe to call twice for the same job: the second call returns the
    /// existing entry without writing anything.
    pub async fn move_to_dlq(&self, job_id: Uuid) -> Result<DlqEntry, QueueError> {
        let moved = self.store.move_job_to_dlq(job_id).await?;

        if moved.created {
            self.store
                .append_log(
                    NewLogEntry::new(job_id, LogLevel::Error, "moved to dead-letter queue")
                        .metadata(json!({
                            "dlq_entry_id": moved.entry.id,
                            "error": moved.entry.error_message,
                            "failure_count": moved.entry.failure_count,
                        })),
                )
                .await?;

            tracing::error!(
                job_id = %job_id,
                entry_id = %moved.entry.id,
                failure_count = moved.entry.failure_count,
                "job moved to dead-letter queue"
            );
        }

        Ok(moved.entry)
    }

    /// Enqueue a brand-new job built from the entry's snapshot.
    ///
    /// The new job starts with `retry_count = 0` and priority elevated above
    /// the original so reprocessed work jumps the queue; the entry moves to
    /// `reprocessing`. Returns the new job's id.
    pub async fn reprocess(&self, entry_id: Uuid) -> Result<Uuid, QueueError> {
        let entry = self
            .store
            .get_dlq_entry(entry_id)
            .await?
            .ok_or(QueueError::DlqEntryNotFound(entry_id))?;

        let replacement = entry.replacement_job(Utc::now());
        let updated = self.store.begin_reprocess(entry_id, &replacement).await?;

        self.store
            .append_log(
                NewLogEntry::new(
                    replacement.id,
                    LogLevel::Info,
                    "requeued from dead-letter queue",
                )
                .metadata(json!({
                    "dlq_entry_id": entry_id,
                    "original_job_id": updated.job_id,
                    "priority": replacement.priority.get(),
                })),
            )
            .await?;

        tracing::info!(
            entry_id = %entry_id,
            original_job_id = %updated.job_id,
            new_job_id = %replacement.id,
            reprocess_attempts = updated.reprocess_attempts,
            "dead-letter entry reprocessing"
        );

        Ok(replacement.id)
    }

    /// Close an entry as resolved, with optional operator notes.
    pub async fn resolve(
        &self,
        entry_id: Uuid,
        notes: Option<&str>,
    ) -> Result<DlqEntry, QueueError> {
        let entry = self
            .store
            .close_dlq_entry(entry_id, DlqStatus::Resolved, notes)
            .await?;
        tracing::info!(entry_id = %entry_id, "dead-letter entry resolved");
        Ok(entry)
    }

    /// Close an entry as abandoned, with optional operator notes.
    pub async fn abandon(
        &self,
        entry_id: Uuid,
        notes: Option<&str>,
    ) -> Result<DlqEntry, QueueError> {
        let entry = self
            .store
            .close_dlq_entry(entry_id, DlqStatus::Abandoned, notes)
            .await?;
        tracing::info!(entry_id = %entry_id, "dead-letter entry abandoned");
        Ok(entry)
    }

    pub async fn entry(&self, entry_id: Uuid) -> Result<Option<DlqEntry>, QueueError> {
        Ok(self.store.get_dlq_entry(entry_id).await?)
    }

    pub async fn list(
        &self,
        filter: DlqFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, QueueError> {
        Ok(self.store.list_dlq(filter, offset, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::EnqueueRequest;

    #[test]
    fn snapshot_counts_all_failed_attempts() {
        let mut job = EnqueueRequest::new("scan", "Scan")
            .max_retries(2)
            .into_job(Utc::now());
        job.retry_count = 1;
        job.error_message = Some("upstream 500".to_string());

        let entry = DlqEntry::snapshot_of(&job, Utc::now());
        assert_eq!(entry.failure_count, 2);
        assert_eq!(entry.status, DlqStatus::Failed);
        assert_eq!(entry.job_id, job.id);
    }

    #[test]
    fn replacement_job_gets_new_identity_and_fresh_budget() {
        let job = EnqueueRequest::new("scan", "Scan")
            .priority(Priority::new(5).unwrap())
            .into_job(Utc::now());
        let entry = DlqEntry::snapshot_of(&job, Utc::now());

        let replacement = entry.replacement_job(Utc::now());
        assert_ne!(replacement.id, job.id);
        assert_eq!(replacement.retry_count, 0);
        assert_eq!(replacement.status, JobStatus::Pending);
        assert!(replacement.priority.get() > job.priority.get());
        assert_eq!(replacement.payload, job.payload);
    }

    #[test]
    fn status_round_trips_and_closes() {
        for status in [
            DlqStatus::Failed,
            DlqStatus::Reprocessing,
            DlqStatus::Resolved,
            DlqStatus::Abandoned,
        ] {
            assert_eq!(DlqStatus::parse(status.as_str()), Some(status));
        }
        assert!(DlqStatus::Resolved.is_closed());
        assert!(DlqStatus::Abandoned.is_closed());
        assert!(!DlqStatus::Reprocessing.is_closed());
    }
}
