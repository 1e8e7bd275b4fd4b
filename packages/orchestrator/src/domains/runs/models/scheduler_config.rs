//! SchedulerConfig - one row per schedulable task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor, PgPool};

#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub job_name: String,
    pub cron_pattern: String,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
}

impl SchedulerConfig {
    /// Insert or refresh a schedule.
    ///
    /// The cron pattern follows configuration; `enabled` is left as stored so
    /// an operator can switch a schedule off in the database.
    pub async fn upsert(
        job_name: &str,
        cron_pattern: &str,
        next_run: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            INSERT INTO scheduler_config (job_name, cron_pattern, next_run)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_name) DO UPDATE
            SET cron_pattern = EXCLUDED.cron_pattern,
                next_run = EXCLUDED.next_run,
                updated_at = NOW()
            RETURNING job_name, cron_pattern, enabled, next_run, last_run
            "#,
        )
        .bind(job_name)
        .bind(cron_pattern)
        .bind(next_run)
        .fetch_one(pool)
        .await
    }

    pub async fn find_all(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT job_name, cron_pattern, enabled, next_run, last_run
            FROM scheduler_config
            ORDER BY job_name
            "#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn find_by_name(job_name: &str, pool: &PgPool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT job_name, cron_pattern, enabled, next_run, last_run
            FROM scheduler_config
            WHERE job_name = $1
            "#,
        )
        .bind(job_name)
        .fetch_optional(pool)
        .await
    }

    /// Claim a tick for this schedule.
    ///
    /// Returns false when the tick (or a later one) was already claimed, which
    /// makes re-evaluating the same minute boundary a no-op.
    pub async fn claim_tick<'e, E>(
        job_name: &str,
        tick: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
        executor: E,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE scheduler_config
            SET last_run = $2,
                next_run = $3,
                updated_at = NOW()
            WHERE job_name = $1
              AND enabled = TRUE
              AND (last_run IS NULL OR last_run < $2)
            "#,
        )
        .bind(job_name)
        .bind(tick)
        .bind(next_run)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn set_next_run(
        job_name: &str,
        next_run: Option<DateTime<Utc>>,
        pool: &PgPool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scheduler_config SET next_run = $2, updated_at = NOW() WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(next_run)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn set_enabled(job_name: &str, enabled: bool, pool: &PgPool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scheduler_config SET enabled = $2, updated_at = NOW() WHERE job_name = $1",
        )
        .bind(job_name)
        .bind(enabled)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
