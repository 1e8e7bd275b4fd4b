//! JobRun - one audit row per task handler invocation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Stats reported by the persist stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_jobs_processed: i32,
    pub jobs_saved: i32,
    pub skipped_duplicates: i32,
    pub errors_count: i32,
}

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    /// NULL while the run is in progress
    pub finished_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error_message: Option<String>,
    pub output: Option<String>,
    pub jobs_saved: i32,
    pub total_jobs_processed: i32,
    pub skipped_duplicates: i32,
    pub errors_count: i32,
    pub duration_seconds: Option<f64>,
    /// Scrape-stage run a persist-stage run was chained from
    pub parent_job_id: Option<Uuid>,
}

impl JobRun {
    /// Parsed status; rows are constrained by a CHECK so this only fails on schema drift.
    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        self.run_status() == Some(RunStatus::Success)
    }

    pub fn stats(&self) -> RunStats {
        RunStats {
            total_jobs_processed: self.total_jobs_processed,
            jobs_saved: self.jobs_saved,
            skipped_duplicates: self.skipped_duplicates,
            errors_count: self.errors_count,
        }
    }

    pub async fn find_by_id(id: Uuid, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_name, started_at, finished_at, status, error_message, output,
                   jobs_saved, total_jobs_processed, skipped_duplicates, errors_count,
                   duration_seconds, parent_job_id
            FROM job_runs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Most recent runs first.
    pub async fn find_recent(limit: i64, pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_name, started_at, finished_at, status, error_message, output,
                   jobs_saved, total_jobs_processed, skipped_duplicates, errors_count,
                   duration_seconds, parent_job_id
            FROM job_runs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Runs chained from the given scrape run.
    pub async fn find_children(parent_id: Uuid, pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT id, job_name, started_at, finished_at, status, error_message, output,
                   jobs_saved, total_jobs_processed, skipped_duplicates, errors_count,
                   duration_seconds, parent_job_id
            FROM job_runs
            WHERE parent_job_id = $1
            ORDER BY started_at
            "#,
        )
        .bind(parent_id)
        .fetch_all(pool)
        .await
    }

    /// Number of runs started since `since`.
    pub async fn count_since(since: DateTime<Utc>, pool: &PgPool) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM job_runs WHERE started_at >= $1")
            .bind(since)
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [RunStatus::Running, RunStatus::Success, RunStatus::Error] {
            assert_eq!(status.as_str().parse::<RunStatus>(), Ok(status));
        }
        assert!("succeeded".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_only_running_is_not_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Error.is_terminal());
    }
}
