//! Run ledger start/finish guarantees.

mod common;

use common::TestHarness;
use orchestrator_core::common::TaskError;
use orchestrator_core::domains::runs::{LedgerError, RunStats, RunStatus, OUTPUT_LOG_LIMIT};
use orchestrator_core::kernel::jobs::TaskOutcome;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn test_track_records_success_with_stats(ctx: &TestHarness) {
    let ledger = ctx.ledger();
    let stats = RunStats {
        total_jobs_processed: 47,
        jobs_saved: 35,
        skipped_duplicates: 8,
        errors_count: 4,
    };

    let tracked = ledger
        .track("save-jobs-to-db", None, |_run_id| async move {
            Ok(TaskOutcome {
                stats,
                output: Some("Total jobs processed: 47".to_string()),
                results_file: None,
            })
        })
        .await
        .unwrap();

    assert!(tracked.result.is_ok());
    assert_eq!(tracked.run.run_status(), Some(RunStatus::Success));
    assert_eq!(tracked.run.stats(), stats);
    assert!(tracked.run.finished_at.is_some());
    assert!(tracked.run.duration_seconds.unwrap() >= 0.0);
    assert_eq!(tracked.run.error_message, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_track_records_handler_error(ctx: &TestHarness) {
    let ledger = ctx.ledger();

    let tracked = ledger
        .track("scrape-jobs", None, |_run_id| async move {
            Err(TaskError::ProcessFailed {
                stage: "scrape",
                exit_code: Some(2),
                output: "Starting scraper\n".to_string(),
            })
        })
        .await
        .unwrap();

    assert!(tracked.result.is_err());
    assert_eq!(tracked.run.run_status(), Some(RunStatus::Error));
    assert_eq!(
        tracked.run.error_message.as_deref(),
        Some("scrape process exited with code 2")
    );
    assert_eq!(tracked.run.output.as_deref(), Some("Starting scraper\n"));
    assert!(tracked.run.finished_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_track_finishes_run_when_handler_panics(ctx: &TestHarness) {
    let ledger = ctx.ledger();

    let tracked = ledger
        .track("scrape-jobs", None, |_run_id| async move {
            if true {
                panic!("marker parser exploded");
            }
            Ok(TaskOutcome::default())
        })
        .await
        .unwrap();

    assert!(matches!(tracked.result, Err(TaskError::Panicked(ref msg)) if msg == "marker parser exploded"));
    assert_eq!(tracked.run.run_status(), Some(RunStatus::Error));
    assert!(tracked.run.finished_at.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_run_finishes_only_once(ctx: &TestHarness) {
    let ledger = ctx.ledger();
    let run_id = ledger.start_run("scrape-jobs", None).await.unwrap();

    let running = ledger.find(run_id).await.unwrap().unwrap();
    assert_eq!(running.run_status(), Some(RunStatus::Running));
    assert!(running.finished_at.is_none());

    ledger
        .finish_run(run_id, RunStatus::Success, None, None, &RunStats::default())
        .await
        .unwrap();

    let err = ledger
        .finish_run(run_id, RunStatus::Error, Some("late"), None, &RunStats::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyFinished(id) if id == run_id));

    let finished = ledger.find(run_id).await.unwrap().unwrap();
    assert_eq!(finished.run_status(), Some(RunStatus::Success));
    assert_eq!(finished.error_message, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_output_keeps_tail(ctx: &TestHarness) {
    let ledger = ctx.ledger();
    let output = format!("{}Results saved to: out.json", "x".repeat(OUTPUT_LOG_LIMIT));

    let run_id = ledger.start_run("scrape-jobs", None).await.unwrap();
    let run = ledger
        .finish_run(run_id, RunStatus::Success, None, Some(&output), &RunStats::default())
        .await
        .unwrap();

    let stored = run.output.unwrap();
    assert_eq!(stored.chars().count(), OUTPUT_LOG_LIMIT);
    assert!(stored.ends_with("Results saved to: out.json"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_parent_link_requires_successful_parent(ctx: &TestHarness) {
    let ledger = ctx.ledger();

    let failed = ledger.start_run("scrape-jobs", None).await.unwrap();
    ledger
        .finish_run(failed, RunStatus::Error, Some("exit 2"), None, &RunStats::default())
        .await
        .unwrap();
    let succeeded = ledger.start_run("scrape-jobs", None).await.unwrap();
    ledger
        .finish_run(succeeded, RunStatus::Success, None, None, &RunStats::default())
        .await
        .unwrap();

    let orphan = ledger.start_run("save-jobs-to-db", Some(failed)).await.unwrap();
    let child = ledger.start_run("save-jobs-to-db", Some(succeeded)).await.unwrap();

    assert_eq!(ledger.find(orphan).await.unwrap().unwrap().parent_job_id, None);
    assert_eq!(
        ledger.find(child).await.unwrap().unwrap().parent_job_id,
        Some(succeeded)
    );
}

#[test_context(TestHarness)]
#[tokio::test]
async fn test_recent_and_count_since(ctx: &TestHarness) {
    let ledger = ctx.ledger();
    let first = ledger.start_run("health-check", None).await.unwrap();
    let second = ledger.start_run("scrape-jobs", None).await.unwrap();

    let recent = ledger.recent(10).await.unwrap();
    assert_eq!(recent.len(), 2);
    let ids: Vec<_> = recent.iter().map(|r| r.id).collect();
    assert!(ids.contains(&first) && ids.contains(&second));

    assert_eq!(ledger.recent(1).await.unwrap().len(), 1);
    assert_eq!(ledger.count_since(chrono::Duration::hours(24)).await.unwrap(), 2);
}
