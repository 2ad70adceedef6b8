//! End-to-end lifecycle tests over the in-memory store: claim contention,
//! retry exhaustion into the DLQ, reprocessing, and priority ordering.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use jobq::{
    DeadLetterManager, DlqFilter, DlqStatus, EnqueueRequest, FailureOutcome, InMemoryStore,
    JobQueue, JobStatus, LogLevel, Priority, RetryPolicy, TenantId,
};

fn queue_with_store() -> (JobQueue, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let queue = JobQueue::new(store.clone()).with_retry_policy(
        RetryPolicy::new(Duration::from_secs(10), Duration::from_secs(60)).with_jitter(0.0),
    );
    (queue, store)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_hand_each_job_to_exactly_one_worker() {
    let (queue, _store) = queue_with_store();
    let queue = Arc::new(queue);

    let job_id = queue
        .enqueue(EnqueueRequest::new("scan", "contended job"))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for k in 0..8 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue
                .claim_next(&format!("worker-{k}"), None)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if let Some(job) = task.await.unwrap() {
            assert_eq!(job.id, job_id);
            winners += 1;
        }
    }
    assert_eq!(winners, 1, "exactly one worker may win the claim");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn contended_claims_spread_across_distinct_jobs() {
    let (queue, _store) = queue_with_store();
    let queue = Arc::new(queue);

    for i in 0..4 {
        queue
            .enqueue(EnqueueRequest::new("scan", format!("job-{i}")))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for k in 0..4 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            queue
                .claim_next(&format!("worker-{k}"), None)
                .await
                .unwrap()
        }));
    }

    let mut claimed_ids = Vec::new();
    for task in tasks {
        if let Some(job) = task.await.unwrap() {
            claimed_ids.push(job.id);
        }
    }
    claimed_ids.sort();
    claimed_ids.dedup();
    assert_eq!(claimed_ids.len(), 4, "no job may be claimed twice");
}

/// A priority-5 job with max_retries 2 fails twice: it must land in the
/// DLQ with exactly two error-level log rows and one entry, and
/// reprocessing must create a fresh, higher-priority job.
#[tokio::test]
async fn double_failure_escalates_and_reprocess_starts_fresh() {
    let store = Arc::new(InMemoryStore::new());
    let queue = JobQueue::new(store.clone()).with_retry_policy(
        RetryPolicy::new(Duration::from_millis(200), Duration::from_millis(500)).with_jitter(0.0),
    );
    let tenant = TenantId::new();

    let job_id = queue
        .enqueue(
            EnqueueRequest::new("report", "job A")
                .tenant(tenant)
                .priority(Priority::new(5).unwrap())
                .max_retries(2),
        )
        .await
        .unwrap();

    // First failure: rescheduled with backoff.
    queue.claim_next("w1", None).await.unwrap().unwrap();
    let outcome = queue
        .report_failure(job_id, "upstream 500", None, "w1")
        .await
        .unwrap();
    assert!(matches!(outcome, FailureOutcome::Retrying { retry_count: 1, .. }));

    let retrying = queue.job(job_id).await.unwrap().unwrap();
    assert_eq!(retrying.status, JobStatus::Retrying);
    assert!(
        queue.claim_next("w2", None).await.unwrap().is_none(),
        "retry must not be claimable before its backoff elapses"
    );

    // Second failure after the backoff: budget exhausted, DLQ.
    let job = loop {
        if let Some(job) = queue.claim_next("w2", None).await.unwrap() {
            break job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    assert_eq!(job.id, job_id);

    let outcome = queue
        .report_failure(job_id, "upstream 500 again", None, "w2")
        .await
        .unwrap();
    let entry_id = match outcome {
        FailureOutcome::MovedToDlq { entry_id } => entry_id,
        other => panic!("expected DLQ escalation, got {other:?}"),
    };

    // Job A is terminal and preserved beyond its stamp.
    let job = queue.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::MovedToDlq);
    assert_eq!(job.retry_count, 1);

    // Exactly 2 error rows: one per failure.
    let logs = queue.logs(job_id, 100).await.unwrap();
    let error_rows: Vec<_> = logs
        .iter()
        .filter(|log| log.level == LogLevel::Error)
        .collect();
    assert_eq!(error_rows.len(), 2);

    // Exactly 1 DLQ entry, counting both failed attempts.
    let dlq = DeadLetterManager::new(store.clone());
    let entries = dlq.list(DlqFilter::default(), 0, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry_id);
    assert_eq!(entries[0].failure_count, 2);
    assert_eq!(entries[0].tenant_id, Some(tenant));

    // Reprocess: new job B, elevated priority, fresh budget.
    let new_job_id = dlq.reprocess(entry_id).await.unwrap();
    assert_ne!(new_job_id, job_id);

    let job_b = queue.job(new_job_id).await.unwrap().unwrap();
    assert_eq!(job_b.status, JobStatus::Pending);
    assert_eq!(job_b.retry_count, 0);
    assert!(job_b.priority.get() > 5);
    assert_eq!(job_b.tenant_id, Some(tenant));

    let entry = dlq.entry(entry_id).await.unwrap().unwrap();
    assert_eq!(entry.status, DlqStatus::Reprocessing);
    assert_eq!(entry.reprocess_attempts, 1);
}

#[tokio::test]
async fn dlq_move_is_idempotent_end_to_end() {
    let (queue, store) = queue_with_store();
    let job_id = queue
        .enqueue(EnqueueRequest::new("scan", "doomed").max_retries(0))
        .await
        .unwrap();
    queue.claim_next("w1", None).await.unwrap().unwrap();
    queue
        .report_failure(job_id, "boom", None, "w1")
        .await
        .unwrap();

    let dlq = DeadLetterManager::new(store.clone());
    let again = dlq.move_to_dlq(job_id).await.unwrap();

    let entries = dlq.list(DlqFilter::default(), 0, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, again.id);
}

#[tokio::test]
async fn retry_count_never_exceeds_max_retries() {
    let (queue, _store) = queue_with_store();
    let fast = JobQueue::new(queue.store())
        .with_retry_policy(RetryPolicy::new(Duration::ZERO, Duration::ZERO).with_jitter(0.0));

    let max_retries = 3;
    let job_id = fast
        .enqueue(EnqueueRequest::new("scan", "always fails").max_retries(max_retries))
        .await
        .unwrap();

    loop {
        let job = loop {
            if let Some(job) = fast.claim_next("w1", None).await.unwrap() {
                break job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(job.retry_count <= max_retries);

        match fast
            .report_failure(job_id, "permanent breakage", None, "w1")
            .await
            .unwrap()
        {
            FailureOutcome::Retrying { retry_count, .. } => {
                assert!(retry_count < max_retries);
            }
            FailureOutcome::MovedToDlq { .. } => break,
        }
    }

    let job = fast.job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::MovedToDlq);
    assert!(job.retry_count <= max_retries);
}

#[tokio::test]
async fn applied_retry_delay_matches_the_policy() {
    let (queue, _store) = queue_with_store();
    let job_id = queue
        .enqueue(EnqueueRequest::new("scan", "backoff probe").max_retries(10))
        .await
        .unwrap();

    queue.claim_next("w1", None).await.unwrap().unwrap();
    let before = chrono::Utc::now();
    queue
        .report_failure(job_id, "transient", None, "w1")
        .await
        .unwrap();

    let job = queue.job(job_id).await.unwrap().unwrap();
    let first_delay = job.scheduled_for - before;
    assert!(first_delay >= chrono::Duration::seconds(9));
    assert!(first_delay <= chrono::Duration::seconds(11));
}

/// 100 priority-10 jobs starve a single priority-1 job under one polling
/// worker. A documented trade-off, asserted rather than prevented.
#[tokio::test]
async fn low_priority_job_is_served_last() {
    let (queue, _store) = queue_with_store();

    let straggler = queue
        .enqueue(
            EnqueueRequest::new("scan", "low priority")
                .priority(Priority::new(1).unwrap()),
        )
        .await
        .unwrap();

    for i in 0..100 {
        queue
            .enqueue(
                EnqueueRequest::new("scan", format!("high-{i}"))
                    .priority(Priority::new(10).unwrap()),
            )
            .await
            .unwrap();
    }

    let mut order = Vec::new();
    while let Some(job) = queue.claim_next("w1", None).await.unwrap() {
        order.push(job.id);
        queue.report_success(job.id, None, "w1").await.unwrap();
    }

    assert_eq!(order.len(), 101);
    assert_eq!(*order.last().unwrap(), straggler);
}

#[tokio::test]
async fn tenant_filters_scope_dlq_listings() {
    let (queue, store) = queue_with_store();
    let tenant_a = TenantId::new();
    let tenant_b = TenantId::new();

    for (tenant, name) in [(tenant_a, "a"), (tenant_b, "b")] {
        let id = queue
            .enqueue(
                EnqueueRequest::new("scan", name)
                    .tenant(tenant)
                    .max_retries(0),
            )
            .await
            .unwrap();
        queue.claim_next("w1", None).await.unwrap().unwrap();
        queue.report_failure(id, "nope", None, "w1").await.unwrap();
    }

    let dlq = DeadLetterManager::new(store);
    let all = dlq.list(DlqFilter::default(), 0, 10).await.unwrap();
    assert_eq!(all.len(), 2);

    let only_a = dlq
        .list(DlqFilter::default().tenant(tenant_a), 0, 10)
        .await
        .unwrap();
    assert_eq!(only_a.len(), 1);
    assert_eq!(only_a[0].tenant_id, Some(tenant_a));

    let resolved = dlq
        .list(DlqFilter::default().status(DlqStatus::Resolved), 0, 10)
        .await
        .unwrap();
    assert!(resolved.is_empty());
}

#[tokio::test]
async fn reprocessed_job_fails_like_a_fresh_job() {
    let (_, store) = queue_with_store();
    let fast = JobQueue::new(store.clone())
        .with_retry_policy(RetryPolicy::new(Duration::ZERO, Duration::ZERO).with_jitter(0.0));

    let job_id = fast
        .enqueue(EnqueueRequest::new("scan", "original").max_retries(0))
        .await
        .unwrap();
    fast.claim_next("w1", None).await.unwrap().unwrap();
    let outcome = fast
        .report_failure(job_id, "bad credentials", None, "w1")
        .await
        .unwrap();
    let FailureOutcome::MovedToDlq { entry_id } = outcome else {
        panic!("expected DLQ escalation");
    };

    let dlq = DeadLetterManager::new(store.clone());
    let second_id = dlq.reprocess(entry_id).await.unwrap();

    // The replacement runs on its own retry budget and can dead-letter
    // again, producing a second, independent entry.
    fast.claim_next("w1", None).await.unwrap().unwrap();
    fast.report_failure(second_id, "still bad", None, "w1")
        .await
        .unwrap();

    let entries = dlq.list(DlqFilter::default(), 0, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
}

#[tokio::test]
async fn operator_can_resolve_and_abandon_with_notes() {
    let (queue, store) = queue_with_store();
    let dlq = DeadLetterManager::new(store);

    let mut entry_ids = Vec::new();
    for name in ["one", "two"] {
        let id = queue
            .enqueue(EnqueueRequest::new("scan", name).max_retries(0))
            .await
            .unwrap();
        queue.claim_next("w1", None).await.unwrap().unwrap();
        let outcome = queue.report_failure(id, "broken", None, "w1").await.unwrap();
        let FailureOutcome::MovedToDlq { entry_id } = outcome else {
            panic!("expected DLQ escalation");
        };
        entry_ids.push(entry_id);
    }

    let resolved = dlq
        .resolve(entry_ids[0], Some("fixed the credentials"))
        .await
        .unwrap();
    assert_eq!(resolved.status, DlqStatus::Resolved);
    assert_eq!(resolved.notes.as_deref(), Some("fixed the credentials"));

    let abandoned = dlq.abandon(entry_ids[1], Some("tenant offboarded")).await.unwrap();
    assert_eq!(abandoned.status, DlqStatus::Abandoned);

    // Closed entries cannot be reprocessed.
    assert!(dlq.reprocess(entry_ids[0]).await.is_err());
}

#[tokio::test]
async fn logs_capture_the_full_lifecycle() {
    let (queue, _store) = queue_with_store();
    let job_id = queue
        .enqueue(EnqueueRequest::new("sync", "traced").payload(json!({"n": 1})))
        .await
        .unwrap();
    queue.claim_next("w1", None).await.unwrap().unwrap();
    queue
        .report_progress(job_id, LogLevel::Info, "halfway", json!({"pct": 50}))
        .await
        .unwrap();
    queue.report_success(job_id, None, "w1").await.unwrap();

    let logs = queue.logs(job_id, 100).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["enqueued", "claimed", "halfway", "completed"]);
}
