//! PostgreSQL-backed job queue implementation.
//!
//! A claimed job keeps its database transaction open until the job reaches
//! an outcome. The transaction holds two locks:
//! - a transaction-scoped advisory lock shared by every worker, so at most one
//!   job runs at a time across all processes;
//! - the row lock on the claimed job (`FOR UPDATE SKIP LOCKED`).
//!
//! If the worker process dies mid-job the transaction aborts, both locks are
//! released and the job becomes claimable again (at-least-once delivery).

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use super::job::{ErrorKind, QueuedJob};
use crate::domains::pipeline::TaskPayload;

/// Attempts allowed when the caller does not say otherwise.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 1;

/// Advisory lock key serialising all workers ("SCRAPE" in ASCII).
const WORKER_LOCK_KEY: i64 = 0x5343_5241_5045;

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Re-queued; will be claimable again at `run_at`
    Retrying {
        attempt_count: i32,
        run_at: DateTime<Utc>,
    },
    /// Archived as permanently failed
    Failed { attempt_count: i32 },
}

/// PostgreSQL-backed job queue.
#[derive(Debug, Clone)]
pub struct PostgresJobQueue {
    pool: PgPool,
}

impl PostgresJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue a task for immediate execution.
    ///
    /// Fails if the queue store is unreachable.
    pub async fn enqueue(&self, task: &TaskPayload, max_attempts: i32) -> Result<Uuid, sqlx::Error> {
        let id = Self::insert(&self.pool, task, max_attempts).await?;
        info!(job_id = %id, task_name = task.task_name(), max_attempts, "enqueued job");
        Ok(id)
    }

    /// Insert a queue row through any executor (pool or open transaction).
    pub(crate) async fn insert<'e, E>(
        executor: E,
        task: &TaskPayload,
        max_attempts: i32,
    ) -> Result<Uuid, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO job_queue (id, task_name, payload, max_attempts)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(task.task_name())
        .bind(task.to_json())
        .bind(max_attempts.max(1))
        .fetch_one(executor)
        .await
    }

    /// Claim the next due job, if any.
    ///
    /// Returns `Ok(None)` when the queue is empty or another worker is
    /// currently executing a job.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(WORKER_LOCK_KEY)
            .fetch_one(&mut *tx)
            .await?;

        if !acquired {
            debug!("another worker holds the execution lock");
            tx.rollback().await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, QueuedJob>(
            r#"
            UPDATE job_queue
            SET locked_by = $1,
                locked_at = NOW()
            WHERE id = (
                SELECT id
                FROM job_queue
                WHERE run_at <= NOW()
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, task_name, payload, state, attempt_count, max_attempts,
                      locked_by, locked_at, last_error, run_at, created_at
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        match job {
            Some(job) => Ok(Some(ClaimedJob { tx, job })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }
}

/// A job exclusively held by this worker until `complete` or `fail` commits.
///
/// Dropping a `ClaimedJob` rolls the claim back and leaves the job queued.
pub struct ClaimedJob {
    tx: Transaction<'static, Postgres>,
    job: QueuedJob,
}

impl std::fmt::Debug for ClaimedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimedJob").field("job", &self.job).finish()
    }
}

impl ClaimedJob {
    pub fn job(&self) -> &QueuedJob {
        &self.job
    }

    pub fn id(&self) -> Uuid {
        self.job.id
    }

    /// Archive the job as completed, enqueueing a follow-up task in the same
    /// transaction.
    ///
    /// Either both writes commit or neither does; on error the job stays queued.
    pub async fn complete(
        mut self,
        follow_up: Option<(&TaskPayload, i32)>,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let follow_up_id = match follow_up {
            Some((task, max_attempts)) => {
                Some(PostgresJobQueue::insert(&mut *self.tx, task, max_attempts).await?)
            }
            None => None,
        };

        archive(&mut self.tx, self.job.id, "completed", self.job.attempt_count, None).await?;
        self.tx.commit().await?;

        Ok(follow_up_id)
    }

    /// Record a failed attempt: re-queue with backoff while attempts remain
    /// and the error is retryable, otherwise archive as failed.
    pub async fn fail(
        mut self,
        error: &str,
        kind: ErrorKind,
        retry_base: Duration,
    ) -> Result<FailureOutcome, sqlx::Error> {
        let attempt_count = self.job.attempt_count + 1;

        if kind.should_retry() && self.job.can_retry_after_failure() {
            let delay = self.job.retry_delay(retry_base);
            let run_at = sqlx::query_scalar::<_, DateTime<Utc>>(
                r#"
                UPDATE job_queue
                SET state = 'retry',
                    attempt_count = $2,
                    last_error = $3,
                    run_at = NOW() + ($4 * INTERVAL '1 second'),
                    locked_by = NULL,
                    locked_at = NULL
                WHERE id = $1
                RETURNING run_at
                "#,
            )
            .bind(self.job.id)
            .bind(attempt_count)
            .bind(error)
            .bind(delay.as_secs_f64())
            .fetch_one(&mut *self.tx)
            .await?;
            self.tx.commit().await?;

            return Ok(FailureOutcome::Retrying {
                attempt_count,
                run_at,
            });
        }

        archive(&mut self.tx, self.job.id, "failed", attempt_count, Some(error)).await?;
        self.tx.commit().await?;

        Ok(FailureOutcome::Failed { attempt_count })
    }

    /// Archive as failed without counting an attempt; the job never ran.
    pub async fn fail_permanently(mut self, error: &str) -> Result<FailureOutcome, sqlx::Error> {
        let attempt_count = self.job.attempt_count;
        archive(&mut self.tx, self.job.id, "failed", attempt_count, Some(error)).await?;
        self.tx.commit().await?;

        Ok(FailureOutcome::Failed { attempt_count })
    }
}

async fn archive(
    tx: &mut Transaction<'static, Postgres>,
    job_id: Uuid,
    state: &str,
    attempt_count: i32,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_queue_archive (id, task_name, payload, state, attempt_count, max_attempts,
                                       locked_by, locked_at, last_error, run_at, created_at)
        SELECT id, task_name, payload, $2, $3, max_attempts,
               locked_by, locked_at, COALESCE($4, last_error), run_at, created_at
        FROM job_queue
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(state)
    .bind(attempt_count)
    .bind(error)
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM job_queue WHERE id = $1")
        .bind(job_id)
        .execute(&mut **tx)
        .await?;

    Ok(())
}
