//! Job record, lifecycle status, and the producer-facing enqueue request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::QueueError;

/// Default retry budget for newly enqueued jobs.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default execution timeout for newly enqueued jobs, in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 300;

/// Tenant scope for a job or configuration row.
///
/// Every job belongs to exactly one tenant or is tenant-agnostic (a system
/// job, represented as `None` wherever a tenant is optional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Claim priority. Valid range is 1..=10; higher claims first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(i16);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const DEFAULT: Priority = Priority(5);
    pub const MAX: Priority = Priority(10);

    /// Validate and wrap a raw priority value.
    pub fn new(value: i16) -> Result<Self, QueueError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(QueueError::InvalidPriority(value))
        }
    }

    pub fn get(self) -> i16 {
        self.0
    }

    /// Priority assigned to jobs re-queued from the dead-letter queue:
    /// bumped above the original so reprocessed work jumps the queue.
    pub fn elevated(self) -> Self {
        Self((self.0 + 2).min(Self::MAX.0))
    }

    pub(crate) fn from_stored(value: i16) -> Self {
        Self(value.clamp(Self::MIN.0, Self::MAX.0))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker and executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget; awaiting dead-letter handoff.
    Failed,
    /// Cancelled before it was claimed.
    Cancelled,
    /// Failed and rescheduled for another attempt.
    Retrying,
    /// Escalated to the dead-letter queue.
    MovedToDlq,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Retrying => "retrying",
            JobStatus::MovedToDlq => "moved_to_dlq",
        }
    }

    pub fn parse(value: &str) -> Option<JobStatus> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            "retrying" => Some(JobStatus::Retrying),
            "moved_to_dlq" => Some(JobStatus::MovedToDlq),
            _ => None,
        }
    }

    /// True for the statuses the claim engine may transition to `Processing`.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::MovedToDlq
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of asynchronous work.
///
/// Rows are never deleted; terminal outcomes are stamped onto the record so
/// it remains available as an audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// Key selecting the execution handler.
    pub job_type: String,
    /// Human-readable label.
    pub job_name: String,
    pub tenant_id: Option<TenantId>,
    /// Opaque document interpreted only by the matching handler.
    pub payload: Value,
    pub status: JobStatus,
    pub priority: Priority,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    /// Number of retries scheduled so far.
    pub retry_count: u32,
    pub max_retries: u32,
    pub timeout_seconds: u64,
    /// Earliest eligible claim time.
    pub scheduled_for: DateTime<Utc>,
    /// Worker holding (or last holding) the claim.
    pub claimed_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Whether the claim engine may hand this job to a worker at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_for <= now
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// Execution deadline for the current attempt. The core does not enforce
    /// it; the worker driving the handler is expected to.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.started_at
            .map(|at| at + chrono::Duration::seconds(self.timeout_seconds as i64))
    }
}

/// Producer-facing enqueue request.
///
/// Validation happens while building: an out-of-range priority is rejected
/// by [`Priority::new`] before any row is written.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    job_type: String,
    job_name: String,
    payload: Value,
    tenant_id: Option<TenantId>,
    priority: Priority,
    scheduled_for: Option<DateTime<Utc>>,
    max_retries: u32,
    timeout_seconds: u64,
}

impl EnqueueRequest {
    pub fn new(job_type: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            job_name: job_name.into(),
            payload: Value::Null,
            tenant_id: None,
            priority: Priority::DEFAULT,
            scheduled_for: None,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Delay execution until a specific time.
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Delay execution by a duration from now.
    pub fn delayed(mut self, delay: std::time::Duration) -> Self {
        self.scheduled_for =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    /// Materialize the pending job row this request describes.
    pub(crate) fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: self.job_type,
            job_name: self.job_name,
            tenant_id: self.tenant_id,
            payload: self.payload,
            status: JobStatus::Pending,
            priority: self.priority,
            result: None,
            error_message: None,
            error_stack: None,
            retry_count: 0,
            max_retries: self.max_retries,
            timeout_seconds: self.timeout_seconds,
            scheduled_for: self.scheduled_for.unwrap_or(now),
            claimed_by: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
