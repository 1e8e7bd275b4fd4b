//! Job queue claim, retry and archive behavior against Postgres.

mod common;

use std::time::Duration;

use common::TestHarness;
use orchestrator_core::common::{ClaimError, WorkerError};
use orchestrator_core::domains::pipeline::{TaskPayload, SCRAPE_TASK};
use orchestrator_core::kernel::jobs::{
    ArchivedJob, ErrorKind, FailureOutcome, QueuedJob, TaskRegistry,
};
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn test_enqueue_then_claim(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue
        .enqueue(&TaskPayload::scrape(Some("companies.csv".to_string())), 2)
        .await
        .unwrap();

    let claimed = queue.claim("worker-a").await.unwrap().expect("due job");

    assert_eq!(claimed.id(), job_id);
    assert_eq!(claimed.job().task_name, SCRAPE_TASK);
    assert_eq!(claimed.job().state, "created");
    assert_eq!(claimed.job().attempt_count, 0);
    assert_eq!(claimed.job().max_attempts, 2);
    assert_eq!(claimed.job().locked_by.as_deref(), Some("worker-a"));
    assert_eq!(
        claimed.job().payload,
        serde_json::json!({ "companiesFile": "companies.csv" })
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_only_one_job_claimed_at_a_time(ctx: &TestHarness) {
    let queue = ctx.queue();
    queue.enqueue(&TaskPayload::scrape(None), 1).await.unwrap();
    queue.enqueue(&TaskPayload::HealthCheck, 1).await.unwrap();

    let first = queue.claim("worker-a").await.unwrap().expect("first job");

    // A second job is due, but the execution lock is held
    assert!(queue.claim("worker-b").await.unwrap().is_none());

    first.complete(None).await.unwrap();
    assert!(queue.claim("worker-b").await.unwrap().is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_dropped_claim_leaves_job_queued(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue.enqueue(&TaskPayload::scrape(None), 1).await.unwrap();

    let claimed = queue.claim("worker-a").await.unwrap().expect("due job");
    drop(claimed);

    // The rollback is flushed when the connection goes back to the pool
    let mut reclaimed = None;
    for _ in 0..50 {
        reclaimed = queue.claim("worker-b").await.unwrap();
        if reclaimed.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let reclaimed = reclaimed.expect("job is back");
    assert_eq!(reclaimed.id(), job_id);
    assert_eq!(reclaimed.job().attempt_count, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_complete_archives_and_enqueues_follow_up(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue.enqueue(&TaskPayload::scrape(None), 1).await.unwrap();

    let follow_up = TaskPayload::Persist {
        results_file: "out_2025.json".to_string(),
        scraper_job_id: uuid::Uuid::now_v7(),
    };
    let claimed = queue.claim("worker-a").await.unwrap().unwrap();
    let follow_up_id = claimed
        .complete(Some((&follow_up, 3)))
        .await
        .unwrap()
        .expect("follow-up id");

    let archived = ArchivedJob::find_by_id(job_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(archived.job.state, "completed");

    let pending = QueuedJob::find_pending(&ctx.db_pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, follow_up_id);
    assert_eq!(pending[0].max_attempts, 3);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_retryable_failure_requeues_with_backoff(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue.enqueue(&TaskPayload::scrape(None), 3).await.unwrap();

    let claimed = queue.claim("worker-a").await.unwrap().unwrap();
    let outcome = claimed
        .fail("scrape process exited with code 1", ErrorKind::Retryable, Duration::from_secs(600))
        .await
        .unwrap();

    let FailureOutcome::Retrying { attempt_count, run_at } = outcome else {
        panic!("expected retry, got {outcome:?}");
    };
    assert_eq!(attempt_count, 1);
    assert!(run_at > chrono::Utc::now() + chrono::Duration::seconds(500));

    // Not due yet
    assert!(queue.claim("worker-a").await.unwrap().is_none());

    let pending = QueuedJob::find_pending(&ctx.db_pool).await.unwrap();
    assert_eq!(pending[0].id, job_id);
    assert_eq!(pending[0].state, "retry");
    assert_eq!(pending[0].locked_by, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_non_retryable_failure_archives_immediately(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue.enqueue(&TaskPayload::scrape(None), 3).await.unwrap();

    let claimed = queue.claim("worker-a").await.unwrap().unwrap();
    let outcome = claimed
        .fail("results file not found: out.json", ErrorKind::NonRetryable, Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(outcome, FailureOutcome::Failed { attempt_count: 1 });
    assert!(QueuedJob::find_pending(&ctx.db_pool).await.unwrap().is_empty());

    let archived = ArchivedJob::find_by_id(job_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(archived.job.state, "failed");
    assert_eq!(
        archived.job.last_error.as_deref(),
        Some("results file not found: out.json")
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_unknown_task_is_claim_failure_and_archived(ctx: &TestHarness) {
    sqlx::query(
        "INSERT INTO job_queue (id, task_name, payload, max_attempts) VALUES ($1, 'send-newsletter', '{}', 3)",
    )
    .bind(uuid::Uuid::now_v7())
    .execute(&ctx.db_pool)
    .await
    .unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let worker = ctx.worker(&common::settings(dir.path(), common::SCRAPE_OK, common::PERSIST_OK));

    let err = worker.run_next_job().await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Claim(ClaimError::UnknownTask(ref name)) if name == "send-newsletter"
    ));

    // The poisoned job no longer blocks the queue
    assert!(QueuedJob::find_pending(&ctx.db_pool).await.unwrap().is_empty());
    assert!(worker.run_next_job().await.unwrap().is_none());
}

#[test]
fn test_registry_debug_lists_tasks() {
    let registry = TaskRegistry::new();
    assert_eq!(format!("{registry:?}"), "TaskRegistry { tasks: [] }");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_fail_permanently_keeps_attempt_count(ctx: &TestHarness) {
    let queue = ctx.queue();
    let job_id = queue.enqueue(&TaskPayload::scrape(None), 3).await.unwrap();

    let claimed = queue.claim("worker-a").await.unwrap().unwrap();
    let outcome = claimed.fail_permanently("unusable payload").await.unwrap();

    assert_eq!(outcome, FailureOutcome::Failed { attempt_count: 0 });
    let archived = ArchivedJob::find_by_id(job_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(archived.job.state, "failed");
    assert_eq!(archived.job.attempt_count, 0);
    assert_eq!(archived.job.last_error.as_deref(), Some("unusable payload"));
}
