//! Queue coordination: enqueue, claim, and worker outcome reporting.
//!
//! [`JobQueue`] is the surface producers and workers talk to. It owns no
//! state of its own; every mutation goes through the store's atomic
//! single-row operations, so any number of queue handles over the same
//! store coordinate correctly.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::dlq::DeadLetterManager;
use crate::error::QueueError;
use crate::job::{EnqueueRequest, Job, JobLogEntry, LogLevel, NewLogEntry, TenantId};
use crate::retry::RetryPolicy;
use crate::storage::{QueueStats, Store};

/// What happened to a job after a reported failure.
#[derive(Debug, Clone)]
pub enum FailureOutcome {
    /// Rescheduled for another attempt.
    Retrying {
        retry_count: u32,
        scheduled_for: chrono::DateTime<Utc>,
    },
    /// Retry budget exhausted; escalated to the dead-letter queue.
    MovedToDlq { entry_id: Uuid },
}

/// Producer- and worker-facing queue surface.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn Store>,
    retry_policy: RetryPolicy,
    dlq: DeadLetterManager,
}

impl JobQueue {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let dlq = DeadLetterManager::new(store.clone());
        Self {
            store,
            retry_policy: RetryPolicy::default(),
            dlq,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Persist a new pending job and return its id.
    ///
    /// The job becomes visible to claimers as soon as the write commits.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Uuid, QueueError> {
        let job = request.into_job(Utc::now());
        self.store.insert_job(&job).await?;
        self.store
            .append_log(
                NewLogEntry::new(job.id, LogLevel::Info, "enqueued").metadata(json!({
                    "priority": job.priority.get(),
                    "scheduled_for": job.scheduled_for,
                })),
            )
            .await?;

        tracing::info!(
            job_id = %job.id,
            job_type = %job.job_type,
            tenant_id = ?job.tenant_id,
            priority = %job.priority,
            "job enqueued"
        );
        Ok(job.id)
    }

    /// Claim the next eligible job for `worker_id`.
    ///
    /// `None` means no eligible work exists right now. That is the idle
    /// signal, not an error; callers should back off before polling again.
    pub async fn claim_next(
        &self,
        worker_id: &str,
        allowed_job_types: Option<&[String]>,
    ) -> Result<Option<Job>, QueueError> {
        let Some(job) = self.store.claim_next(worker_id, allowed_job_types).await? else {
            return Ok(None);
        };

        self.store
            .append_log(
                NewLogEntry::new(job.id, LogLevel::Info, "claimed")
                    .metadata(json!({ "worker_id": worker_id })),
            )
            .await?;

        tracing::debug!(
            job_id = %job.id,
            job_type = %job.job_type,
            worker_id = %worker_id,
            "job claimed"
        );
        Ok(Some(job))
    }

    /// Append a progress line to the job's trail.
    pub async fn report_progress(
        &self,
        job_id: Uuid,
        level: LogLevel,
        message: &str,
        metadata: Value,
    ) -> Result<(), QueueError> {
        self.store
            .append_log(NewLogEntry::new(job_id, level, message).metadata(metadata))
            .await?;
        Ok(())
    }

    /// Mark a claimed job completed and stamp its result.
    pub async fn report_success(
        &self,
        job_id: Uuid,
        result: Option<Value>,
        worker_id: &str,
    ) -> Result<(), QueueError> {
        self.store.mark_completed(job_id, result, worker_id).await?;
        self.store
            .append_log(NewLogEntry::new(job_id, LogLevel::Info, "completed"))
            .await?;

        tracing::info!(job_id = %job_id, worker_id = %worker_id, "job completed");
        Ok(())
    }

    /// Record a failed attempt and apply the retry policy.
    ///
    /// While the retry budget lasts the job is rescheduled with backoff;
    /// once exhausted it is stamped `failed` and escalated to the
    /// dead-letter queue. Either way the failure lands in the job's trail
    /// at `error` level.
    pub async fn report_failure(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;

        if self
            .retry_policy
            .should_retry(job.retry_count, job.max_retries)
        {
            let attempt = job.retry_count + 1;
            let delay = self.retry_policy.delay_for_attempt(attempt);
            let scheduled_for = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();

            let updated = self
                .store
                .mark_retrying(job_id, error_message, error_stack, worker_id, scheduled_for)
                .await?;

            self.store
                .append_log(
                    NewLogEntry::new(job_id, LogLevel::Error, "execution failed; retry scheduled")
                        .metadata(json!({
                            "error": error_message,
                            "retry_count": updated.retry_count,
                            "delay_seconds": delay.as_secs(),
                            "scheduled_for": scheduled_for,
                        })),
                )
                .await?;

            tracing::warn!(
                job_id = %job_id,
                worker_id = %worker_id,
                retry_count = updated.retry_count,
                delay_seconds = delay.as_secs(),
                error = %error_message,
                "job failed, retry scheduled"
            );

            Ok(FailureOutcome::Retrying {
                retry_count: updated.retry_count,
                scheduled_for,
            })
        } else {
            self.store
                .mark_failed(job_id, error_message, error_stack, worker_id)
                .await?;

            let entry = self.dlq.move_to_dlq(job_id).await?;

            Ok(FailureOutcome::MovedToDlq { entry_id: entry.id })
        }
    }

    /// Cancel a job that has not been claimed yet.
    pub async fn cancel(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.store.cancel_job(job_id).await?;
        self.store
            .append_log(NewLogEntry::new(job_id, LogLevel::Info, "cancelled"))
            .await?;

        tracing::info!(job_id = %job_id, "job cancelled");
        Ok(())
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(job_id).await?)
    }

    pub async fn logs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobLogEntry>, QueueError> {
        Ok(self.store.list_logs(job_id, limit).await?)
    }

    pub async fn stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, QueueError> {
        Ok(self.store.queue_stats(tenant_id).await?)
    }
}
