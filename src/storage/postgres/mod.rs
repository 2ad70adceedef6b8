//! PostgreSQL store.
//!
//! The durable backend for production deployments:
//!
//! - **Multi-node safe claims** - `FOR UPDATE SKIP LOCKED` hands each
//!   eligible job to exactly one worker without blocking the losers
//! - **Audit-grade persistence** - job rows are never deleted, only
//!   terminal-stamped; log rows are append-only
//! - **Single-row transactions** - every mutation is scoped to one job (or
//!   one DLQ entry plus its replacement), keeping lock scope minimal
//!
//! Tenant isolation is an explicit `tenant_id` filter on every scoped
//! query rather than a database-level row policy.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use crate::alerts::{AlertThresholdConfig, AlertType};
use crate::dlq::{DlqEntry, DlqStatus};
use crate::job::{Job, JobLogEntry, JobStatus, LogLevel, NewLogEntry, Priority, TenantId};

use super::{
    ControlStore, DlqFilter, DlqMove, FailureWindow, QueueStats, QueueStore, StoreError,
};

/// PostgreSQL-backed implementation of [`Store`](super::Store).
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with default pool sizing and bootstrap the schema.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await
            .map_err(|e| {
                StoreError::Unavailable(format!("failed to connect to PostgreSQL: {}", e))
            })?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Reuse an existing pool (e.g. shared with the hosting application).
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("failed to initialize schema: {}", e)))?;
        Ok(())
    }

    /// Produce the precise error for a conditional update that matched no
    /// row: the job is either missing or in the wrong status.
    async fn job_update_conflict(&self, job_id: Uuid, expected: &str) -> StoreError {
        let status: Result<Option<(String,)>, _> =
            sqlx::query_as(r#"SELECT status FROM jobq_jobs WHERE id = $1"#)
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await;

        match status {
            Ok(Some((status,))) => StoreError::Conflict(format!(
                "job {job_id} is {status}, not {expected}"
            )),
            Ok(None) => StoreError::NotFound(format!("job {job_id}")),
            Err(e) => StoreError::Internal(format!("failed to read job status: {}", e)),
        }
    }
}

#[async_trait]
impl QueueStore for PostgresStore {
    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobq_jobs (
                id, job_type, job_name, tenant_id, payload, status, priority,
                retry_count, max_retries, timeout_seconds, scheduled_for,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.job_name)
        .bind(job.tenant_id.map(|t| t.0))
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.priority.get())
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.timeout_seconds as i64)
        .bind(job.scheduled_for)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to insert job: {}", e)))?;
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(r#"SELECT * FROM jobq_jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("failed to get job: {}", e)))?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        allowed_job_types: Option<&[String]>,
    ) -> Result<Option<Job>, StoreError> {
        let now = Utc::now();
        let allowed = allowed_job_types.map(|types| types.to_vec());

        // SKIP LOCKED keeps concurrent claimers from blocking each other:
        // a competing claim hides its candidate row, so this caller's
        // subquery lands on the next eligible one instead of waiting.
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobq_jobs
            SET status = 'processing',
                claimed_by = $1,
                started_at = $2,
                updated_at = $2
            WHERE id = (
                SELECT id FROM jobq_jobs
                WHERE status IN ('pending', 'retrying')
                  AND scheduled_for <= $2
                  AND ($3::text[] IS NULL OR job_type = ANY($3))
                ORDER BY priority DESC, scheduled_for ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(now)
        .bind(allowed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to claim job: {}", e)))?;

        row.map(|r| r.into_job()).transpose()
    }

    async fn mark_completed(
        &self,
        job_id: Uuid,
        result: Option<Value>,
        worker_id: &str,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobq_jobs
            SET status = 'completed',
                result = $1,
                claimed_by = $2,
                completed_at = $3,
                updated_at = $3
            WHERE id = $4 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(result)
        .bind(worker_id)
        .bind(now)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to mark completed: {}", e)))?;

        match row {
            Some(r) => r.into_job(),
            None => Err(self.job_update_conflict(job_id, "processing").await),
        }
    }

    async fn mark_retrying(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobq_jobs
            SET status = 'retrying',
                retry_count = retry_count + 1,
                error_message = $1,
                error_stack = $2,
                claimed_by = $3,
                scheduled_for = $4,
                updated_at = $5
            WHERE id = $6 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(error_message)
        .bind(error_stack)
        .bind(worker_id)
        .bind(scheduled_for)
        .bind(now)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to schedule retry: {}", e)))?;

        match row {
            Some(r) => r.into_job(),
            None => Err(self.job_update_conflict(job_id, "processing").await),
        }
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        error_message: &str,
        error_stack: Option<&str>,
        worker_id: &str,
    ) -> Result<Job, StoreError> {
        let now = Utc::now();
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobq_jobs
            SET status = 'failed',
                error_message = $1,
                error_stack = $2,
                claimed_by = $3,
                completed_at = $4,
                updated_at = $4
            WHERE id = $5 AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(error_message)
        .bind(error_stack)
        .bind(worker_id)
        .bind(now)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to mark failed: {}", e)))?;

        match row {
            Some(r) => r.into_job(),
            None => Err(self.job_update_conflict(job_id, "processing").await),
        }
    }

    async fn cancel_job(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let now = Utc::now();
        let row: Option<JobRow> = sqlx::query_as(
            r#"
            UPDATE jobq_jobs
            SET status = 'cancelled',
                completed_at = $1,
                updated_at = $1
            WHERE id = $2 AND status IN ('pending', 'retrying')
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to cancel job: {}", e)))?;

        match row {
            Some(r) => r.into_job(),
            None => Err(self.job_update_conflict(job_id, "pending or retrying").await),
        }
    }

    async fn append_log(&self, entry: NewLogEntry) -> Result<JobLogEntry, StoreError> {
        let row: LogRow = sqlx::query_as(
            r#"
            INSERT INTO jobq_job_logs (job_id, level, message, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(entry.job_id)
        .bind(entry.level.as_str())
        .bind(&entry.message)
        .bind(&entry.metadata)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to append log: {}", e)))?;

        row.into_log()
    }

    async fn list_logs(&self, job_id: Uuid, limit: usize) -> Result<Vec<JobLogEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobq_job_logs
            WHERE job_id = $1
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to list logs: {}", e)))?;

        rows.into_iter().map(|r| r.into_log()).collect()
    }
}

#[async_trait]
impl ControlStore for PostgresStore {
    async fn move_job_to_dlq(&self, job_id: Uuid) -> Result<DlqMove, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to open transaction: {}", e)))?;

        let job: Option<JobRow> =
            sqlx::query_as(r#"SELECT * FROM jobq_jobs WHERE id = $1 FOR UPDATE"#)
                .bind(job_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Internal(format!("failed to lock job: {}", e)))?;

        let job = job
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?
            .into_job()?;

        if job.status == JobStatus::MovedToDlq {
            let existing: Option<DlqRow> =
                sqlx::query_as(r#"SELECT * FROM jobq_dlq WHERE job_id = $1"#)
                    .bind(job_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| {
                        StoreError::Internal(format!("failed to fetch dlq entry: {}", e))
                    })?;
            tx.commit()
                .await
                .map_err(|e| StoreError::Internal(format!("failed to commit: {}", e)))?;
            let entry = existing
                .ok_or_else(|| {
                    StoreError::Internal(format!("job {job_id} is moved_to_dlq with no entry"))
                })?
                .into_entry()?;
            return Ok(DlqMove {
                entry,
                created: false,
            });
        }

        if job.status != JobStatus::Failed {
            return Err(StoreError::Conflict(format!(
                "job {job_id} is {}, not failed",
                job.status
            )));
        }

        let now = Utc::now();
        let entry = DlqEntry::snapshot_of(&job, now);

        sqlx::query(
            r#"
            INSERT INTO jobq_dlq (
                id, job_id, job_type, job_name, tenant_id, payload, priority,
                max_retries, timeout_seconds, error_message, error_stack,
                failure_count, status, reprocess_attempts, moved_to_dlq_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(&entry.job_type)
        .bind(&entry.job_name)
        .bind(entry.tenant_id.map(|t| t.0))
        .bind(&entry.payload)
        .bind(entry.priority.get())
        .bind(entry.max_retries as i32)
        .bind(entry.timeout_seconds as i64)
        .bind(&entry.error_message)
        .bind(&entry.error_stack)
        .bind(entry.failure_count as i32)
        .bind(entry.status.as_str())
        .bind(entry.reprocess_attempts as i32)
        .bind(entry.moved_to_dlq_at)
        .bind(entry.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to insert dlq entry: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE jobq_jobs
            SET status = 'moved_to_dlq', updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(job_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to stamp job: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Internal(format!("failed to commit: {}", e)))?;

        Ok(DlqMove {
            entry,
            created: true,
        })
    }

    async fn get_dlq_entry(&self, entry_id: Uuid) -> Result<Option<DlqEntry>, StoreError> {
        let row: Option<DlqRow> = sqlx::query_as(r#"SELECT * FROM jobq_dlq WHERE id = $1"#)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Internal(format!("failed to get dlq entry: {}", e)))?;

        row.map(|r| r.into_entry()).transpose()
    }

    async fn list_dlq(
        &self,
        filter: DlqFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DlqEntry>, StoreError> {
        let rows: Vec<DlqRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobq_dlq
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY moved_to_dlq_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(filter.tenant_id.map(|t| t.0))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to list dlq: {}", e)))?;

        rows.into_iter().map(|r| r.into_entry()).collect()
    }

    async fn begin_reprocess(
        &self,
        entry_id: Uuid,
        replacement: &Job,
    ) -> Result<DlqEntry, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to open transaction: {}", e)))?;

        let entry: Option<DlqRow> =
            sqlx::query_as(r#"SELECT * FROM jobq_dlq WHERE id = $1 FOR UPDATE"#)
                .bind(entry_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| StoreError::Internal(format!("failed to lock dlq entry: {}", e)))?;

        let entry = entry
            .ok_or_else(|| StoreError::NotFound(format!("dlq entry {entry_id}")))?
            .into_entry()?;

        if entry.status.is_closed() {
            return Err(StoreError::Conflict(format!(
                "dlq entry {entry_id} is {} and cannot be reprocessed",
                entry.status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO jobq_jobs (
                id, job_type, job_name, tenant_id, payload, status, priority,
                retry_count, max_retries, timeout_seconds, scheduled_for,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(replacement.id)
        .bind(&replacement.job_type)
        .bind(&replacement.job_name)
        .bind(replacement.tenant_id.map(|t| t.0))
        .bind(&replacement.payload)
        .bind(replacement.status.as_str())
        .bind(replacement.priority.get())
        .bind(replacement.retry_count as i32)
        .bind(replacement.max_retries as i32)
        .bind(replacement.timeout_seconds as i64)
        .bind(replacement.scheduled_for)
        .bind(replacement.created_at)
        .bind(replacement.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to insert replacement job: {}", e)))?;

        let updated: DlqRow = sqlx::query_as(
            r#"
            UPDATE jobq_dlq
            SET status = 'reprocessing',
                reprocess_attempts = reprocess_attempts + 1,
                updated_at = $1
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(Utc::now())
        .bind(entry_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to update dlq entry: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Internal(format!("failed to commit: {}", e)))?;

        updated.into_entry()
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

        let row: Option<DlqRow> = sqlx::query_as(
            r#"
            UPDATE jobq_dlq
            SET status = $1, notes = $2, updated_at = $3
            WHERE id = $4 AND status IN ('failed', 'reprocessing')
            RETURNING *
            "#,
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(Utc::now())
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to close dlq entry: {}", e)))?;

        match row {
            Some(r) => r.into_entry(),
            None => {
                let exists: Option<(String,)> =
                    sqlx::query_as(r#"SELECT status FROM jobq_dlq WHERE id = $1"#)
                        .bind(entry_id)
                        .fetch_optional(&self.pool)
                        .await
                        .map_err(|e| {
                            StoreError::Internal(format!("failed to read dlq status: {}", e))
                        })?;
                match exists {
                    Some((status,)) => Err(StoreError::Conflict(format!(
                        "dlq entry {entry_id} is already {status}"
                    ))),
                    None => Err(StoreError::NotFound(format!("dlq entry {entry_id}"))),
                }
            }
        }
    }

    async fn upsert_alert_threshold(
        &self,
        config: &AlertThresholdConfig,
    ) -> Result<(), StoreError> {
        let channels = serde_json::to_value(&config.channels)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE jobq_alert_thresholds
            SET threshold = $1, unit = $2, enabled = $3, channels = $4, updated_at = $5
            WHERE tenant_id IS NOT DISTINCT FROM $6 AND alert_type = $7
            "#,
        )
        .bind(config.threshold)
        .bind(&config.unit)
        .bind(config.enabled)
        .bind(&channels)
        .bind(Utc::now())
        .bind(config.tenant_id.map(|t| t.0))
        .bind(config.alert_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to update threshold: {}", e)))?;

        if updated.rows_affected() > 0 {
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO jobq_alert_thresholds (
                id, tenant_id, alert_type, threshold, unit, enabled, channels,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(config.id)
        .bind(config.tenant_id.map(|t| t.0))
        .bind(config.alert_type.as_str())
        .bind(config.threshold)
        .bind(&config.unit)
        .bind(config.enabled)
        .bind(&channels)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to insert threshold: {}", e)))?;

        Ok(())
    }

    async fn list_alert_thresholds(&self) -> Result<Vec<AlertThresholdConfig>, StoreError> {
        let rows: Vec<ThresholdRow> =
            sqlx::query_as(r#"SELECT * FROM jobq_alert_thresholds ORDER BY created_at ASC"#)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Internal(format!("failed to list thresholds: {}", e)))?;

        rows.into_iter().map(|r| r.into_config()).collect()
    }

    async fn queue_stats(&self, tenant_id: Option<TenantId>) -> Result<QueueStats, StoreError> {
        let counts: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) AS count
            FROM jobq_jobs
            WHERE ($1::uuid IS NULL OR tenant_id = $1)
            GROUP BY status
            "#,
        )
        .bind(tenant_id.map(|t| t.0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to get stats: {}", e)))?;

        let mut stats = QueueStats::default();
        let mut by_status: HashMap<String, u64> = HashMap::new();
        for (status, count) in counts {
            by_status.insert(status, count as u64);
        }
        stats.pending = by_status.remove("pending").unwrap_or(0);
        stats.processing = by_status.remove("processing").unwrap_or(0);
        stats.retrying = by_status.remove("retrying").unwrap_or(0);
        stats.completed = by_status.remove("completed").unwrap_or(0);
        stats.failed = by_status.remove("failed").unwrap_or(0);
        stats.cancelled = by_status.remove("cancelled").unwrap_or(0);
        stats.moved_to_dlq = by_status.remove("moved_to_dlq").unwrap_or(0);
        Ok(stats)
    }

    async fn failure_stats(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<FailureWindow, StoreError> {
        let row: (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'completed') AS succeeded,
                COUNT(*) FILTER (WHERE status IN ('failed', 'moved_to_dlq')) AS failed
            FROM jobq_jobs
            WHERE completed_at >= $1
              AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(since)
        .bind(tenant_id.map(|t| t.0))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to get failure stats: {}", e)))?;

        Ok(FailureWindow {
            succeeded: row.0 as u64,
            failed: row.1 as u64,
        })
    }

    async fn dlq_growth(
        &self,
        tenant_id: Option<TenantId>,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM jobq_dlq
            WHERE moved_to_dlq_at >= $1
              AND ($2::uuid IS NULL OR tenant_id = $2)
            "#,
        )
        .bind(since)
        .bind(tenant_id.map(|t| t.0))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to get dlq growth: {}", e)))?;

        Ok(row.0 as u64)
    }

    async fn queue_depth(&self, tenant_id: Option<TenantId>) -> Result<u64, StoreError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM jobq_jobs
            WHERE status IN ('pending', 'retrying')
              AND ($1::uuid IS NULL OR tenant_id = $1)
            "#,
        )
        .bind(tenant_id.map(|t| t.0))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Internal(format!("failed to get queue depth: {}", e)))?;

        Ok(row.0 as u64)
    }
}

// ============================================================================
// Database row types
// ============================================================================

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    job_name: String,
    tenant_id: Option<Uuid>,
    payload: Value,
    status: String,
    priority: i16,
    result: Option<Value>,
    error_message: Option<String>,
    error_stack: Option<String>,
    retry_count: i32,
    max_retries: i32,
    timeout_seconds: i64,
    scheduled_for: DateTime<Utc>,
    claimed_by: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, StoreError> {
        let status = JobStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("unknown job status '{}'", self.status))
        })?;

        Ok(Job {
            id: self.id,
            job_type: self.job_type,
            job_name: self.job_name,
            tenant_id: self.tenant_id.map(TenantId::from_uuid),
            payload: self.payload,
            status,
            priority: Priority::from_stored(self.priority),
            result: self.result,
            error_message: self.error_message,
            error_stack: self.error_stack,
            retry_count: self.retry_count as u32,
            max_retries: self.max_retries as u32,
            timeout_seconds: self.timeout_seconds as u64,
            scheduled_for: self.scheduled_for,
            claimed_by: self.claimed_by,
            started_at: self.started_at,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LogRow {
    id: i64,
    job_id: Uuid,
    level: String,
    message: String,
    metadata: Option<Value>,
    created_at: DateTime<Utc>,
}

impl LogRow {
    fn into_log(self) -> Result<JobLogEntry, StoreError> {
        let level = LogLevel::parse(&self.level).ok_or_else(|| {
            StoreError::Serialization(format!("unknown log level '{}'", self.level))
        })?;

        Ok(JobLogEntry {
            id: self.id,
            job_id: self.job_id,
            level,
            message: self.message,
            metadata: self.metadata.unwrap_or(Value::Null),
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DlqRow {
    id: Uuid,
    job_id: Uuid,
    job_type: String,
    job_name: String,
    tenant_id: Option<Uuid>,
    payload: Value,
    priority: i16,
    max_retries: i32,
    timeout_seconds: i64,
    error_message: Option<String>,
    error_stack: Option<String>,
    failure_count: i32,
    status: String,
    reprocess_attempts: i32,
    notes: Option<String>,
    moved_to_dlq_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DlqRow {
    fn into_entry(self) -> Result<DlqEntry, StoreError> {
        let status = DlqStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Serialization(format!("unknown dlq status '{}'", self.status))
        })?;

        Ok(DlqEntry {
            id: self.id,
            job_id: self.job_id,
            job_type: self.job_type,
            job_name: self.job_name,
            tenant_id: self.tenant_id.map(TenantId::from_uuid),
            payload: self.payload,
            priority: Priority::from_stored(self.priority),
            max_retries: self.max_retries as u32,
            timeout_seconds: self.timeout_seconds as u64,
            error_message: self.error_message,
            error_stack: self.error_stack,
            failure_count: self.failure_count as u32,
            status,
            reprocess_attempts: self.reprocess_attempts as u32,
            notes: self.notes,
            moved_to_dlq_at: self.moved_to_dlq_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ThresholdRow {
    id: Uuid,
    tenant_id: Option<Uuid>,
    alert_type: String,
    threshold: f64,
    unit: String,
    enabled: bool,
    channels: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ThresholdRow {
    fn into_config(self) -> Result<AlertThresholdConfig, StoreError> {
        let alert_type = AlertType::parse(&self.alert_type).ok_or_else(|| {
            StoreError::Serialization(format!("unknown alert type '{}'", self.alert_type))
        })?;
        let channels: Vec<String> = serde_json::from_value(self.channels)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(AlertThresholdConfig {
            id: self.id,
            tenant_id: self.tenant_id.map(TenantId::from_uuid),
            alert_type,
            threshold: self.threshold,
            unit: self.unit,
            enabled: self.enabled,
            channels,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ============================================================================
// Database schema
// ============================================================================

const SCHEMA_SQL: &str = r#"
-- Jobs table. Rows are never deleted; terminal outcomes are stamped.
CREATE TABLE IF NOT EXISTS jobq_jobs (
    id UUID PRIMARY KEY,
    job_type TEXT NOT NULL,
    job_name TEXT NOT NULL,
    tenant_id UUID,
    payload JSONB NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority SMALLINT NOT NULL DEFAULT 5,
    result JSONB,
    error_message TEXT,
    error_stack TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    timeout_seconds BIGINT NOT NULL DEFAULT 300,
    scheduled_for TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    claimed_by TEXT,
    started_at TIMESTAMPTZ,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

-- Claim path: eligible jobs ordered by priority then schedule.
CREATE INDEX IF NOT EXISTS idx_jobq_jobs_claimable
    ON jobq_jobs(priority DESC, scheduled_for ASC)
    WHERE status IN ('pending', 'retrying');
CREATE INDEX IF NOT EXISTS idx_jobq_jobs_tenant_status
    ON jobq_jobs(tenant_id, status);
CREATE INDEX IF NOT EXISTS idx_jobq_jobs_completed_at
    ON jobq_jobs(completed_at)
    WHERE completed_at IS NOT NULL;

-- Append-only per-job trail, cascade-owned by the job row.
CREATE TABLE IF NOT EXISTS jobq_job_logs (
    id BIGSERIAL PRIMARY KEY,
    job_id UUID NOT NULL REFERENCES jobq_jobs(id) ON DELETE CASCADE,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    metadata JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_jobq_job_logs_job
    ON jobq_job_logs(job_id, id);

-- Dead-letter snapshots. job_id is unique: at most one entry per job.
CREATE TABLE IF NOT EXISTS jobq_dlq (
    id UUID PRIMARY KEY,
    job_id UUID NOT NULL UNIQUE,
    job_type TEXT NOT NULL,
    job_name TEXT NOT NULL,
    tenant_id UUID,
    payload JSONB NOT NULL,
    priority SMALLINT NOT NULL DEFAULT 5,
    max_retries INTEGER NOT NULL DEFAULT 3,
    timeout_seconds BIGINT NOT NULL DEFAULT 300,
    error_message TEXT,
    error_stack TEXT,
    failure_count INTEGER NOT NULL DEFAULT 1,
    status TEXT NOT NULL DEFAULT 'failed',
    reprocess_attempts INTEGER NOT NULL DEFAULT 0,
    notes TEXT,
    moved_to_dlq_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_jobq_dlq_tenant_status
    ON jobq_dlq(tenant_id, status, moved_to_dlq_at DESC);

-- Per-tenant (or global, tenant_id NULL) alert thresholds.
CREATE TABLE IF NOT EXISTS jobq_alert_thresholds (
    id UUID PRIMARY KEY,
    tenant_id UUID,
    alert_type TEXT NOT NULL,
    threshold DOUBLE PRECISION NOT NULL,
    unit TEXT NOT NULL,
    enabled BOOLEAN NOT NULL DEFAULT TRUE,
    channels JSONB NOT NULL DEFAULT '[]'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_jobq_alert_thresholds_key
    ON jobq_alert_thresholds(COALESCE(tenant_id, '00000000-0000-0000-0000-000000000000'::uuid), alert_type);
"#;
