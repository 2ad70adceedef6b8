//! Execution adapter contract: job-type-keyed handlers.
//!
//! The queue core never interprets payloads. Work is performed by
//! [`JobHandler`] implementations owned by application code and registered
//! in a [`HandlerRegistry`] keyed by job type. New job types are added by
//! registering new handlers, never by subclassing a job base type.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::job::{Job, TenantId};

/// Failure reported by a handler.
///
/// Every handler failure counts against the job's retry budget; exhaustion
/// escalates the job to the dead-letter queue.
#[derive(Debug, Clone)]
pub struct JobError {
    pub message: String,
    pub stack: Option<String>,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: std::error::Error> From<E> for JobError {
    fn from(err: E) -> Self {
        Self::new(err.to_string())
    }
}

/// Result type returned by handlers: an optional result document on
/// success, a [`JobError`] on failure.
pub type HandlerResult = Result<Option<Value>, JobError>;

/// Context passed to a handler alongside the payload.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_type: String,
    pub tenant_id: Option<TenantId>,
    /// Retries scheduled before this attempt; 0 on the first run.
    pub retry_count: u32,
    /// Deadline the handler is expected to respect. The core does not
    /// enforce it; the worker driving the handler does.
    pub deadline: Option<DateTime<Utc>>,
}

impl JobContext {
    pub(crate) fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type.clone(),
            tenant_id: job.tenant_id,
            retry_count: job.retry_count,
            deadline: job.deadline(),
        }
    }
}

/// A job-type-specific execution adapter.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler serves; used as the registry key.
    fn job_type(&self) -> String;

    /// Perform the work described by `payload`.
    async fn handle(&self, payload: Value, ctx: JobContext) -> HandlerResult;
}

/// Capability-keyed dispatch table: job type -> handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_type(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// The job types this registry can execute, for claim filtering.
    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }
}
