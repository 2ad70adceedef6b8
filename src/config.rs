//! Worker engine configuration.

use std::time::Duration;

use uuid::Uuid;

/// Tunables for a [`WorkerEngine`](crate::WorkerEngine) instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum jobs this engine processes concurrently.
    pub max_concurrent_jobs: usize,
    /// Identifier prefix for this worker process; each loop appends its
    /// slot index.
    pub worker_id: String,
    /// Initial sleep after an empty claim.
    pub idle_backoff_base: Duration,
    /// Ceiling for the idle sleep as it doubles.
    pub idle_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            worker_id: default_worker_id(),
            idle_backoff_base: Duration::from_millis(100),
            idle_backoff_max: Duration::from_secs(5),
        }
    }
}

impl WorkerConfig {
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }
}

fn default_worker_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("worker-{}", &suffix[..8])
}
