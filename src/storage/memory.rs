//! In-memory store for tests and single-process development.
//!
//! All state lives behind one mutex, so the claim path is trivially atomic:
//! candidate selection and the status flip happen in the same critical
//! section. Semantics match the Postgres store; the integration tests lean
//! on that equivalence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::alerts::{AlertThresholdConfig, AlertType};
use crate::dlq::{DlqEntry, DlqStatus};
use crate::job::{Job, JobLogEntry, JobStatus, NewLogEntry, TenantId};

use super::{
    ControlStore, DlqFilter, DlqMove, FailureWindow, QueueStats, QueueStore, StoreError,
};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    logs: Vec<JobLogEntry>,
    next_log_id: i64,
    dlq: HashMap<Uuid, DlqEntry>,
    dlq_by_job: HashMap<Uuid, Uuid>,
    thresholds: HashMap<(Option<TenantId>, AlertType), AlertThresholdConfig>,
}

/// Mutex-backed store with the same observable behavior as the durable one.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tenant_matches(job_tenant: Option<TenantId>, filter: Option<TenantId>) -> bool {
    match filter {
        Some(tenant) => job_tenant == Some(tenant),
        None => true,
    }
}

#[async_trait]
impl QueueStore for InMemoryStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!(
                "job {} already exists",
                job.id
            )));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.jobs.get(&job_id).cloned())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        allowed_job_types: Option<&[String]>,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();

        let candidate = inner
            .jobs
            .values()
            .filter(|job| {
                job.is_claimable_at(now)
                    && allowed_job_types
                        .map_or(true, |types| types.iter().any(|t| *t == job.job_type))
            })
            // Highest priority first, then earliest scheduled_for; created_at
            // keeps the order deterministic for simultaneous schedules.
            .min_by_key(|job| {
                (
                    std::cmp::Reverse(job.priority),
                    job.scheduled_for,
                    job.created_at,
                )
            })
            .map(|job| job.id);

        let Some(job_id) = candidate else {
            return Ok(None);
        };

        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Internal("claim candidate vanished".to_string()))?;
        job.status = JobStatus::Processing;
        job.claimed_by = Some(worker_id.to_string());
        job.started_at = Some(now);
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        result: Option<Value>,
        worker_id: &str,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {}, not processing",
                job.status
            )));
        }
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.result = result;
        job.claimed_by = Some(worker_id.to_string());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {}, not processing",
                job.status
            )));
        }
        let now = Utc::now();
        job.status = JobStatus::Retrying;
        job.retry_count += 1;
        job.error_message = Some(error_message.to_string());
        job.error_stack = error_stack.map(String::from);
        job.claimed_by = Some(worker_id.to_string());
        job.scheduled_for = scheduled_for;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
    ) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {}, not processing",
                job.status
            )));
        }
        let now = Utc::now();
        job.status = JobStatus::Failed;
        job.error_message = Some(error_message.to_string());
        job.error_stack = error_stack.map(String::from);
        job.claimed_by = Some(worker_id.to_string());
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let job = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if !job.status.is_claimable() {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {} and can no longer be cancelled",
                job.status
            )));
        }
        let now = Utc::now();
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(now);
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<JobLogEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.jobs.contains_key(&entry.job_id) {
            return Err(StoreError::NotFound(format!("job {}", entry.job_id)));
        }
        inner.next_log_id += 1;
        let log = JobLogEntry {
            id: inner.next_log_id,
            job_id: entry.job_id,
            level: entry.level,
            message: entry.message,
            metadata: entry.metadata,
            created_at: Utc::now(),
        };
        inner.logs.push(log.clone());
        Ok(log)
    }

    async fn list_logs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobLogEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .logs
            .iter()
            .filter(|log| log.job_id == job_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ControlStore for InMemoryStore {
    async fn move_job_to_dlq(&self, job_id: Uuid) -> Result<DlqMove, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(entry_id) = inner.dlq_by_job.get(&job_id).copied() {
            let entry = inner
                .dlq
                .get(&entry_id)
                .cloned()
                .ok_or_else(|| StoreError::Internal("dangling dlq index".to_string()))?;
            return Ok(DlqMove {
                entry,
                created: false,
            });
        }

        let job = inner
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Failed {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {}, not failed",
                job.status
            )));
        }

        let now = Utc::now();
        let entry = DlqEntry::snapshot_of(&job, now);

        let stored = inner
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::Internal("job vanished mid-move".to_string()))?;
        stored.status = JobStatus::MovedToDlq;
        stored.updated_at = now;

        inner.dlq_by_job.insert(job_id, entry.id);
        inner.dlq.insert(entry.id, entry.clone());
        Ok(DlqMove {
            entry,
            created: true,
        })
    }

    async fn get_dlq_entry(&self, entry_id: Uuid) -> Result<Option<DlqEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.dlq.get(&entry_id).cloned())
    }

    async fn list_dlq(
        &self,
        filter: DlqFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut entries: Vec<_> = inner
            .dlq
            .values()
            .filter(|entry| {
                tenant_matches(entry.tenant_id, filter.tenant_id)
                    && filter.status.map_or(true, |s| entry.status == s)
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.moved_to_dlq_at.cmp(&a.moved_to_dlq_at));
        Ok(entries.into_iter().skip(offset).take(limit).collect())
    }

    async fn begin_reprocess(
        &self,
        entry_id: Uuid,
        replacement: &Job,
    ) -> Result<DlqEntry, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let entry = inner
            .dlq
            .get(&entry_id)
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {entry_id}")))?;
        if entry.status.is_closed() {
            return Err(StoreError::Conflict(format!(
                "dlq entry {entry_id} is {} and cannot be reprocessed",
                entry.status
            )));
        }
        if inner.jobs.contains_key(&replacement.id) {
            return Err(StoreError::Conflict(format!(
                "job {} already exists",
                replacement.id
            )));
        }

        inner.jobs.insert(replacement.id, replacement.clone());

        let entry = inner
            .dlq
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::Internal("dlq entry vanished".to_string()))?;
        entry.status = DlqStatus::Reprocessing;
        entry.reprocess_attempts += 1;
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn close_dlq_entry(
        &self,
        entry_id: Uuid,
        status: DlqStatus,
        notes: Option<&str>,
    ) -> Result<DlqEntry, StoreError> {
        if !status.is_closed() {
            return Err(StoreError::Configuration(format!(
                "{status} is not a closing status"
            )));
        }
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .dlq
            .get_mut(&entry_id)
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {entry_id}")))?;
        if entry.status.is_closed() {
            return Err(StoreError::Conflict(format!(
                "dlq entry {entry_id} is already {}",
                entry.status
            )));
        }
        entry.status = status;
        entry.notes = notes.map(String::from);
        entry.updated_at = Utc::now();
        Ok(entry.clone())
    }

    async fn upsert_alert_threshold(
        &self,
        config: &AlertThresholdConfig,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .thresholds
            .insert((config.tenant_id, config.alert_type), config.clone());
        Ok(())
    }

    async fn list_alert_thresholds(&self) -> Result<Vec<AlertThresholdConfig>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut configs: Vec<_> = inner.thresholds.values().cloned().collect();
        configs.sort_by_key(|c| c.created_at);
        Ok(configs)
    }

    async fn queue_stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut stats = QueueStats::default();
        for job in inner
            .jobs
            .values()
            .filter(|job| tenant_matches(job.tenant_id, tenant_id))
        {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Processing => stats.processing += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Cancelled => stats.cancelled += 1,
                JobStatus::MovedToDlq => stats.moved_to_dlq += 1,
            }
        }
        Ok(stats)
    }

    async fn failure_stats(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut window = FailureWindow::default();
        for job in inner.jobs.values() {
            if !tenant_matches(job.tenant_id, tenant_id) {
                continue;
            }
            let Some(completed_at) = job.completed_at else {
                continue;
            };
            if completed_at < since {
                continue;
            }
            match job.status {
                JobStatus::Completed => window.succeeded += 1,
                JobStatus::Failed | JobStatus::MovedToDlq => window.failed += 1,
                _ => {}
            }
        }
        Ok(window)
    }

    async fn dlq_growth(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .dlq
            .values()
            .filter(|entry| {
                tenant_matches(entry.tenant_id, tenant_id) && entry.moved_to_dlq_at >= since
            })
            .count() as u64)
    }

    async fn queue_depth(&self, tenant_id: Option<TenantId>) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .jobs
            .values()
            .filter(|job| {
                tenant_matches(job.tenant_id, tenant_id) && job.status.is_claimable()
            })
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EnqueueRequest, LogLevel, Priority};

    fn pending(job_type: &str, priority: i16) -> Job {
        EnqueueRequest::new(job_type, job_type)
            .priority(Priority::new(priority).unwrap())
            .into_job(Utc::now())
    }

    #[tokio::test]
    async fn claim_prefers_highest_priority() {
        let store = InMemoryStore::new();
        let low = pending("scan", 2);
        let high = pending("scan", 9);
        store.insert_job(&low).await.unwrap();
        store.insert_job(&high).await.unwrap();

        let claimed = store.claim_next("w1", None).await.unwrap().unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.claimed_by.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn claim_ties_break_by_earliest_schedule() {
        let store = InMemoryStore::new();
        let mut first = pending("scan", 5);
        first.scheduled_for = Utc::now() - chrono::Duration::seconds(60);
        let second = pending("scan", 5);
        store.insert_job(&second).await.unwrap();
        store.insert_job(&first).await.unwrap();

        let claimed = store.claim_next("w1", None).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
    }

    #[tokio::test]
    async fn claim_skips_future_and_foreign_types() {
        let store = InMemoryStore::new();
        let mut future = pending("scan", 9);
        future.scheduled_for = Utc::now() + chrono::Duration::seconds(3600);
        let other = pending("report", 3);
        store.insert_job(&future).await.unwrap();
        store.insert_job(&other).await.unwrap();

        let allowed = vec!["scan".to_string()];
        let claimed = store.claim_next("w1", Some(&allowed)).await.unwrap();
        assert!(claimed.is_none());

        let claimed = store.claim_next("w1", None).await.unwrap().unwrap();
        assert_eq!(claimed.id, other.id);
    }

    #[tokio::test]
    async fn completion_requires_processing_status() {
        let store = InMemoryStore::new();
        let job = pending("scan", 5);
        store.insert_job(&job).await.unwrap();

        let err = store.mark_completed(job.id, None, "w1").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.claim_next("w1", None).await.unwrap().unwrap();
        let done = store.mark_completed(job.id, None, "w1").await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn cancel_only_before_claim() {
        let store = InMemoryStore::new();
        let job = pending("scan", 5);
        store.insert_job(&job).await.unwrap();
        store.claim_next("w1", None).await.unwrap().unwrap();

        let err = store.cancel_job(job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let other = pending("scan", 5);
        store.insert_job(&other).await.unwrap();
        let cancelled = store.cancel_job(other.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn dlq_move_is_idempotent() {
        let store = InMemoryStore::new();
        let job = pending("scan", 5);
        store.insert_job(&job).await.unwrap();
        store.claim_next("w1", None).await.unwrap().unwrap();
        store
            .mark_failed(job.id, "boom", None, "w1")
            .await
            .unwrap();

        let first = store.move_job_to_dlq(job.id).await.unwrap();
        assert!(first.created);
        let second = store.move_job_to_dlq(job.id).await.unwrap();
        assert!(!second.created);
        assert_eq!(first.entry.id, second.entry.id);

        let entries = store
            .list_dlq(DlqFilter::default(), 0, 10)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn logs_are_append_only_and_ordered() {
        let store = InMemoryStore::new();
        let job = pending("scan", 5);
        store.insert_job(&job).await.unwrap();

        store
            .append_log(NewLogEntry::new(job.id, LogLevel::Info, "first"))
            .await
            .unwrap();
        store
            .append_log(NewLogEntry::new(job.id, LogLevel::Error, "second"))
            .await
            .unwrap();

        let logs = store.list_logs(job.id, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].id < logs[1].id);
        assert_eq!(logs[0].message, "first");
    }

    #[tokio::test]
    async fn stats_are_tenant_scoped() {
        let store = InMemoryStore::new();
        let tenant = TenantId::new();
        let mut mine = pending("scan", 5);
        mine.tenant_id = Some(tenant);
        let theirs = pending("scan", 5);
        store.insert_job(&mine).await.unwrap();
        store.insert_job(&theirs).await.unwrap();

        let scoped = store.queue_stats(Some(tenant)).await.unwrap();
        assert_eq!(scoped.pending, 1);
        let global = store.queue_stats(None).await.unwrap();
        assert_eq!(global.pending, 2);
    }
}
