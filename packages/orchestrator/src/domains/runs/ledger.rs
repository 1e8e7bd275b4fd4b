//! Run ledger - start/finish bookkeeping for `job_runs`.
//!
//! Every handler invocation goes through [`RunLedger::track`], which starts a
//! row, awaits the handler with panic capture and finishes the row exactly
//! once whatever the handler did.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use super::models::{JobRun, RunStats, RunStatus};
use crate::common::text::tail_chars;
use crate::common::TaskError;
use crate::kernel::jobs::TaskOutcome;

/// Characters of captured output kept on a run row.
pub const OUTPUT_LOG_LIMIT: usize = 10_000;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("run {0} is already finished")]
    AlreadyFinished(Uuid),
}

/// A finished run together with what the handler returned.
#[derive(Debug)]
pub struct TrackedRun {
    pub run: JobRun,
    pub result: Result<TaskOutcome, TaskError>,
}

#[derive(Debug, Clone)]
pub struct RunLedger {
    pool: PgPool,
}

impl RunLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a `running` row and return its id.
    ///
    /// The parent link is only recorded when `parent` names a successful run;
    /// otherwise the row starts without one and the handler reports why.
    pub async fn start_run(&self, job_name: &str, parent: Option<Uuid>) -> Result<Uuid, LedgerError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO job_runs (id, job_name, status, parent_job_id)
            VALUES (
                $1, $2, 'running',
                (SELECT id FROM job_runs WHERE id = $3 AND status = 'success')
            )
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(job_name)
        .bind(parent)
        .fetch_one(&self.pool)
        .await?;

        debug!(run_id = %id, job_name, parent_job_id = ?parent, "run started");
        Ok(id)
    }

    /// Move a `running` row to its terminal status.
    ///
    /// Only the first call for a run takes effect; later calls return
    /// [`LedgerError::AlreadyFinished`].
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error: Option<&str>,
        output: Option<&str>,
        stats: &RunStats,
    ) -> Result<JobRun, LedgerError> {
        let status = if status.is_terminal() {
            status
        } else {
            RunStatus::Error
        };
        let output = output.map(|o| tail_chars(o, OUTPUT_LOG_LIMIT));

        let run = sqlx::query_as::<_, JobRun>(
            r#"
            UPDATE job_runs
            SET status = $2,
                finished_at = NOW(),
                duration_seconds = EXTRACT(EPOCH FROM (NOW() - started_at))::DOUBLE PRECISION,
                error_message = $3,
                output = $4,
                jobs_saved = $5,
                total_jobs_processed = $6,
                skipped_duplicates = $7,
                errors_count = $8
            WHERE id = $1 AND status = 'running'
            RETURNING id, job_name, started_at, finished_at, status, error_message, output,
                      jobs_saved, total_jobs_processed, skipped_duplicates, errors_count,
                      duration_seconds, parent_job_id
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error)
        .bind(output)
        .bind(stats.jobs_saved)
        .bind(stats.total_jobs_processed)
        .bind(stats.skipped_duplicates)
        .bind(stats.errors_count)
        .fetch_optional(&self.pool)
        .await?;

        run.ok_or(LedgerError::AlreadyFinished(run_id))
    }

    /// Run `body` between a start and a finish of the same run row.
    ///
    /// A panic inside `body` is converted into [`TaskError::Panicked`] and
    /// recorded like any other failure. Only ledger storage errors escape as
    /// `Err`; the handler's own result is returned in [`TrackedRun::result`].
    pub async fn track<F, Fut>(
        &self,
        job_name: &str,
        parent: Option<Uuid>,
        body: F,
    ) -> Result<TrackedRun, LedgerError>
    where
        F: FnOnce(Uuid) -> Fut,
        Fut: Future<Output = Result<TaskOutcome, TaskError>>,
    {
        let run_id = self.start_run(job_name, parent).await?;

        let result = match AssertUnwindSafe(body(run_id)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
        };

        let run = match &result {
            Ok(outcome) => {
                self.finish_run(
                    run_id,
                    RunStatus::Success,
                    None,
                    outcome.output.as_deref(),
                    &outcome.stats,
                )
                .await?
            }
            Err(error) => {
                warn!(run_id = %run_id, job_name, error = %error, "run failed");
                let message = error.to_string();
                self.finish_run(
                    run_id,
                    RunStatus::Error,
                    Some(&message),
                    error.output(),
                    &RunStats::default(),
                )
                .await?
            }
        };

        Ok(TrackedRun { run, result })
    }

    pub async fn find(&self, run_id: Uuid) -> Result<Option<JobRun>, LedgerError> {
        Ok(JobRun::find_by_id(run_id, &self.pool).await?)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<JobRun>, LedgerError> {
        Ok(JobRun::find_recent(limit, &self.pool).await?)
    }

    pub async fn count_since(&self, window: chrono::Duration) -> Result<i64, LedgerError> {
        Ok(JobRun::count_since(chrono::Utc::now() - window, &self.pool).await?)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
