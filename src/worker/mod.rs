//! Worker engine: bounded-concurrency claim/execute/report loops.
//!
//! Each loop claims through the shared [`JobQueue`], dispatches to the
//! registered handler for the job's type, enforces the job's timeout, and
//! routes the outcome back through `report_success`/`report_failure`.
//! Handler failures are data, never process-fatal: the loop catches them
//! and keeps serving.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::job::{HandlerRegistry, JobContext, JobHandler};
use crate::queue::JobQueue;

/// Exponential backoff for idle polls.
struct Backoff {
    current: Duration,
    base: Duration,
    max: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            current: base,
            base,
            max,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    fn next(&mut self) -> Duration {
        let next = self.current;
        self.current = (self.current * 2).min(self.max);
        next
    }
}

/// Drives N concurrent claim/execute/report loops over a [`JobQueue`].
pub struct WorkerEngine {
    queue: Arc<JobQueue>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
    running: Arc<RwLock<bool>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerEngine {
    pub fn new(queue: Arc<JobQueue>, config: WorkerConfig) -> Self {
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        Self {
            queue,
            handlers: HandlerRegistry::new(),
            config,
            running: Arc::new(RwLock::new(false)),
            shutdown_tx,
        }
    }

    /// Register a handler; the engine only claims jobs of registered types.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.register(handler);
    }

    /// Run until [`stop`](Self::stop) is called or the process receives
    /// Ctrl+C/SIGTERM.
    pub async fn start(&self) -> Result<(), QueueError> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(QueueError::AlreadyRunning);
            }
            *running = true;
        }

        if self.handlers.is_empty() {
            warn!("worker engine started with no registered handlers; nothing will be claimed");
        }

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            worker_id = %self.config.worker_id,
            job_types = ?self.handlers.job_types(),
            "starting worker engine"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut join_handles = Vec::new();
        for slot in 0..self.config.max_concurrent_jobs {
            join_handles.push(self.start_worker_loop(slot, semaphore.clone()));
        }

        tokio::select! {
            _ = self.wait_for_shutdown() => {
                info!("shutdown signal received, stopping worker engine");
            }
            result = futures::future::try_join_all(join_handles) => {
                match result {
                    Ok(_) => info!("all worker loops completed"),
                    Err(e) => error!(error = %e, "a worker task failed"),
                }
            }
        }

        self.stop().await;
        info!("worker engine stopped");
        Ok(())
    }

    /// Signal a graceful stop; in-flight jobs finish before loops exit.
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        let _ = self.shutdown_tx.send(true);
    }

    fn start_worker_loop(
        &self,
        slot: usize,
        semaphore: Arc<Semaphore>,
    ) -> tokio::task::JoinHandle<Result<(), QueueError>> {
        let queue = self.queue.clone();
        let handlers = self.handlers.clone();
        let allowed = handlers.job_types();
        let running = self.running.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let worker_id = format!("{}-{}", self.config.worker_id, slot);
        let mut backoff = Backoff::new(self.config.idle_backoff_base, self.config.idle_backoff_max);

        tokio::spawn(async move {
            debug!(worker_id = %worker_id, "starting worker loop");

            while *running.read().await {
                if *shutdown_rx.borrow() {
                    break;
                }

                if allowed.is_empty() {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                    continue;
                }

                let permit = match semaphore.try_acquire() {
                    Ok(p) => p,
                    Err(_) => {
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                        continue;
                    }
                };

                let claimed = tokio::select! {
                    _ = shutdown_rx.changed() => { drop(permit); break; }
                    res = queue.claim_next(&worker_id, Some(allowed.as_slice())) => res,
                };

                let job = match claimed {
                    Ok(Some(job)) => {
                        backoff.reset();
                        job
                    }
                    Ok(None) => {
                        drop(permit);
                        let sleep_for = backoff.next();
                        tokio::select! {
                            _ = tokio::time::sleep(sleep_for) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                        continue;
                    }
                    Err(e) => {
                        error!(worker_id = %worker_id, error = %e, "failed to claim job");
                        drop(permit);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            _ = shutdown_rx.changed() => break,
                        }
                        continue;
                    }
                };

                let job_id = job.id;
                let job_type = job.job_type.clone();
                debug!(
                    worker_id = %worker_id,
                    job_id = %job_id,
                    job_type = %job_type,
                    "processing job"
                );

                let handler = match handlers.get(&job.job_type) {
                    Some(h) => h,
                    None => {
                        let message = QueueError::HandlerMissing(job_type.clone()).to_string();
                        error!(worker_id = %worker_id, job_id = %job_id, "{message}");
                        if let Err(e) = queue
                            .report_failure(job_id, &message, None, &worker_id)
                            .await
                        {
                            error!(job_id = %job_id, error = %e, "failed to report missing handler");
                        }
                        drop(permit);
                        continue;
                    }
                };

                let ctx = JobContext::for_job(&job);
                let job_timeout = job.timeout();
                let handle_fut = handler.handle(job.payload.clone(), ctx);

                // In-flight attempts run to completion even during
                // shutdown; the next loop iteration observes the flag.
                let timed = tokio::time::timeout(job_timeout, handle_fut).await;

                match timed {
                    Ok(Ok(result)) => {
                        if let Err(e) = queue.report_success(job_id, result, &worker_id).await {
                            error!(job_id = %job_id, error = %e, "failed to report success");
                        }
                    }
                    Ok(Err(job_err)) => {
                        warn!(
                            worker_id = %worker_id,
                            job_id = %job_id,
                            error = %job_err.message,
                            "job handler failed"
                        );
                        if let Err(e) = queue
                            .report_failure(
                                job_id,
                                &job_err.message,
                                job_err.stack.as_deref(),
                                &worker_id,
                            )
                            .await
                        {
                            error!(job_id = %job_id, error = %e, "failed to report failure");
                        }
                    }
                    Err(_elapsed) => {
                        error!(
                            worker_id = %worker_id,
                            job_id = %job_id,
                            timeout_seconds = job_timeout.as_secs(),
                            "job execution timed out"
                        );
                        if let Err(e) = queue
                            .report_failure(job_id, "job execution timed out", None, &worker_id)
                            .await
                        {
                            error!(job_id = %job_id, error = %e, "failed to report timeout");
                        }
                    }
                }

                drop(permit);
            }

            debug!(worker_id = %worker_id, "worker loop stopped");
            Ok(())
        })
    }

    async fn wait_for_shutdown(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => { info!("received Ctrl+C signal"); }
            _ = terminate => { info!("received SIGTERM signal"); }
        }

        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{EnqueueRequest, HandlerResult, JobError, JobStatus};
    use crate::retry::RetryPolicy;
    use crate::storage::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(400));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(500));

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(100));
    }

    struct FlakyHandler {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl crate::job::JobHandler for FlakyHandler {
        fn job_type(&self) -> String {
            "flaky".to_string()
        }

        async fn handle(&self, _payload: Value, _ctx: JobContext) -> HandlerResult {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                Err(JobError::new("transient upstream error"))
            } else {
                Ok(Some(json!({"ok": true})))
            }
        }
    }

    async fn wait_for_status(
        queue: &JobQueue,
        job_id: uuid::Uuid,
        expected: JobStatus,
        budget: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + budget;
        while tokio::time::Instant::now() < deadline {
            let job = queue.job(job_id).await.unwrap().unwrap();
            if job.status == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn engine_processes_a_job_end_to_end() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(
            JobQueue::new(store)
                .with_retry_policy(RetryPolicy::new(
                    Duration::from_millis(10),
                    Duration::from_millis(50),
                )),
        );

        let mut engine = WorkerEngine::new(
            queue.clone(),
            WorkerConfig::default().with_max_concurrent_jobs(2),
        );
        engine.register(Arc::new(FlakyHandler {
            failures_left: AtomicU32::new(0),
        }));
        let engine = Arc::new(engine);

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };

        let job_id = queue
            .enqueue(EnqueueRequest::new("flaky", "smoke"))
            .await
            .unwrap();

        assert!(
            wait_for_status(&queue, job_id, JobStatus::Completed, Duration::from_secs(5)).await,
            "job never completed"
        );

        engine.stop().await;
        let _ = runner.await;

        let job = queue.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn engine_retries_failures_until_success() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(JobQueue::new(store).with_retry_policy(
            RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(20))
                .with_jitter(0.0),
        ));

        let mut engine = WorkerEngine::new(
            queue.clone(),
            WorkerConfig::default().with_max_concurrent_jobs(1),
        );
        engine.register(Arc::new(FlakyHandler {
            failures_left: AtomicU32::new(1),
        }));
        let engine = Arc::new(engine);

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };

        let job_id = queue
            .enqueue(EnqueueRequest::new("flaky", "retry-once").max_retries(3))
            .await
            .unwrap();

        assert!(
            wait_for_status(&queue, job_id, JobStatus::Completed, Duration::from_secs(5)).await,
            "job never completed after retry"
        );

        engine.stop().await;
        let _ = runner.await;

        let job = queue.job(job_id).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let queue = Arc::new(JobQueue::new(store));
        let engine = Arc::new(WorkerEngine::new(queue, WorkerConfig::default()));

        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine.start().await;
        assert!(matches!(second, Err(QueueError::AlreadyRunning)));

        engine.stop().await;
        let _ = runner.await;
    }
}
