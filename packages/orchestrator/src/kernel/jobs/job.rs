//! Queue row models.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Longest delay between two attempts of the same job.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ErrorKind {
    /// Transient error - will retry if attempts remain
    #[default]
    Retryable,
    /// Permanent error - will not retry
    NonRetryable,
}

impl ErrorKind {
    /// Whether this error kind should trigger a retry
    pub fn should_retry(&self) -> bool {
        matches!(self, ErrorKind::Retryable)
    }
}

/// A pending (or retrying) task invocation.
///
/// `attempt_count` counts failed attempts; the job is retried while it stays
/// below `max_attempts`.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub task_name: String,
    pub payload: serde_json::Value,
    /// `created` or `retry`
    pub state: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl QueuedJob {
    /// Whether another attempt is allowed after one more failure.
    pub fn can_retry_after_failure(&self) -> bool {
        self.attempt_count + 1 < self.max_attempts
    }

    /// Delay before the next attempt: `base * 2^(failed_attempts - 1)`, capped at one hour.
    pub fn retry_delay(&self, base: Duration) -> Duration {
        let failed = (self.attempt_count + 1).max(1) as u32;
        let factor = 2u32.saturating_pow(failed - 1);
        base.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }

    /// All jobs still waiting in the queue, oldest first.
    pub async fn find_pending(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, task_name, payload, state, attempt_count, max_attempts,
                   locked_by, locked_at, last_error, run_at, created_at
            FROM job_queue
            ORDER BY run_at, created_at
            "#,
        )
        .fetch_all(pool)
        .await
    }

    /// Pending jobs for one task name.
    pub async fn find_pending_by_task(
        task_name: &str,
        pool: &PgPool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, task_name, payload, state, attempt_count, max_attempts,
                   locked_by, locked_at, last_error, run_at, created_at
            FROM job_queue
            WHERE task_name = $1
            ORDER BY run_at, created_at
            "#,
        )
        .bind(task_name)
        .fetch_all(pool)
        .await
    }
}

/// A job that reached a terminal outcome (`completed` or `failed`).
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedJob {
    #[sqlx(flatten)]
    pub job: QueuedJob,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedJob {
    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, task_name, payload, state, attempt_count, max_attempts,
                   locked_by, locked_at, last_error, run_at, created_at, archived_at
            FROM job_queue_archive
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(attempt_count: i32, max_attempts: i32) -> QueuedJob {
        QueuedJob {
            id: Uuid::now_v7(),
            task_name: "scrape-jobs".to_string(),
            payload: serde_json::json!({}),
            state: "created".to_string(),
            attempt_count,
            max_attempts,
            locked_by: None,
            locked_at: None,
            last_error: None,
            run_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_should_retry() {
        assert!(ErrorKind::Retryable.should_retry());
        assert!(!ErrorKind::NonRetryable.should_retry());
    }

    #[test]
    fn test_single_attempt_job_never_retries() {
        assert!(!job(0, 1).can_retry_after_failure());
    }

    #[test]
    fn test_retries_until_attempts_exhausted() {
        assert!(job(0, 3).can_retry_after_failure());
        assert!(job(1, 3).can_retry_after_failure());
        assert!(!job(2, 3).can_retry_after_failure());
    }

    #[test]
    fn test_retry_delay_backs_off_exponentially() {
        let base = Duration::from_secs(30);
        assert_eq!(job(0, 5).retry_delay(base), Duration::from_secs(30));
        assert_eq!(job(1, 5).retry_delay(base), Duration::from_secs(60));
        assert_eq!(job(2, 5).retry_delay(base), Duration::from_secs(120));
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let base = Duration::from_secs(30);
        assert_eq!(job(20, 50).retry_delay(base), MAX_RETRY_DELAY);
    }
}
