//! # jobq - multi-tenant job queue core
//!
//! A durable job queue for SaaS platforms that need asynchronous work
//! (scans, report generation, notification fan-out, data sync) executed
//! reliably across a fleet of workers:
//!
//! - **Exactly-once claims** - the store's atomic claim hands each job to
//!   one worker; losers skip to the next candidate instead of blocking
//! - **Priority scheduling** - 1..=10, higher first, earliest schedule
//!   breaking ties; delayed execution via `scheduled_for`
//! - **Bounded retries** - exponential backoff with jitter, then
//!   escalation to a dead-letter queue with operator reprocessing
//! - **Tenant isolation** - every job and threshold is scoped to a tenant
//!   (or marked as a system job), enforced at each query boundary
//! - **Audit trail** - jobs are never deleted, and every lifecycle step
//!   appends to a per-job log
//! - **Health alerting** - per-tenant thresholds over failure rate, DLQ
//!   growth, and queue depth, fanned out through a pluggable sink
//!
//! Payload interpretation is owned by [`JobHandler`] implementations
//! registered per job type; the core never looks inside a payload.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use jobq::{
//!     EnqueueRequest, HandlerResult, JobContext, JobHandler, JobQueue,
//!     PostgresStore, Priority, WorkerConfig, WorkerEngine,
//! };
//!
//! struct ScanHandler;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for ScanHandler {
//!     fn job_type(&self) -> String {
//!         "security_scan".to_string()
//!     }
//!
//!     async fn handle(
//!         &self,
//!         payload: serde_json::Value,
//!         _ctx: JobContext,
//!     ) -> HandlerResult {
//!         // ... run the scan described by `payload` ...
//!         Ok(Some(serde_json::json!({ "findings": 0 })))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(PostgresStore::new("postgres://localhost/app").await?);
//!     let queue = Arc::new(JobQueue::new(store));
//!
//!     queue
//!         .enqueue(
//!             EnqueueRequest::new("security_scan", "Nightly scan")
//!                 .payload(serde_json::json!({ "account": "prod" }))
//!                 .priority(Priority::new(8)?),
//!         )
//!         .await?;
//!
//!     let mut engine = WorkerEngine::new(queue, WorkerConfig::default());
//!     engine.register(Arc::new(ScanHandler));
//!     engine.start().await?;
//!     Ok(())
//! }
//! ```

pub mod alerts;
mod config;
mod dlq;
mod error;
mod job;
mod queue;
mod retry;
pub mod storage;
mod worker;

pub use alerts::{
    AlertEvent, AlertMonitor, AlertSink, AlertThresholdConfig, AlertType, TracingAlertSink,
};
pub use config::WorkerConfig;
pub use dlq::{DeadLetterManager, DlqEntry, DlqStatus};
pub use error::QueueError;
pub use job::{
    EnqueueRequest, HandlerRegistry, HandlerResult, Job, JobContext, JobError, JobHandler,
    JobLogEntry, JobStatus, LogLevel, NewLogEntry, Priority, TenantId,
};
pub use queue::{FailureOutcome, JobQueue};
pub use retry::RetryPolicy;
pub use storage::{
    DlqFilter, FailureWindow, InMemoryStore, QueueStats, Store, StoreError,
};
pub use worker::WorkerEngine;

#[cfg(feature = "postgres")]
pub use storage::PostgresStore;
