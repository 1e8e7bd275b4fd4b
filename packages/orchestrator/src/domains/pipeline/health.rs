//! Pipeline health check.
//!
//! Read-only: checks storage connectivity, counts runs in the trailing
//! window and reports the scrape schedule. Failures degrade the report
//! instead of returning an error.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{info, warn};

use super::tasks::{TaskPayload, HEALTH_CHECK_TASK, SCRAPE_TASK};
use crate::common::TaskError;
use crate::domains::runs::{JobRun, SchedulerConfig};
use crate::kernel::jobs::{TaskContext, TaskHandler, TaskOutcome};

/// Trailing window for the recent-runs count.
pub const RECENT_RUNS_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub database_connected: bool,
    pub recent_runs: Option<i64>,
    pub pipeline_enabled: Option<bool>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Build a health report. Never fails; problems are listed in `errors`.
pub async fn check_health(pool: &PgPool) -> HealthReport {
    let mut errors = Vec::new();

    let database_connected = match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => true,
        Err(e) => {
            errors.push(format!("database unreachable: {e}"));
            false
        }
    };

    let mut recent_runs = None;
    let mut schedule = None;

    if database_connected {
        let since = Utc::now() - Duration::hours(RECENT_RUNS_WINDOW_HOURS);
        match JobRun::count_since(since, pool).await {
            Ok(count) => recent_runs = Some(count),
            Err(e) => errors.push(format!("failed to count recent runs: {e}")),
        }

        match SchedulerConfig::find_by_name(SCRAPE_TASK, pool).await {
            Ok(Some(config)) => schedule = Some(config),
            Ok(None) => errors.push(format!("no schedule configured for {SCRAPE_TASK}")),
            Err(e) => errors.push(format!("failed to read scheduler config: {e}")),
        }
    }

    let status = if errors.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        checked_at: Utc::now(),
        database_connected,
        recent_runs,
        pipeline_enabled: schedule.as_ref().map(|s| s.enabled),
        next_run: schedule.as_ref().and_then(|s| s.next_run),
        last_run: schedule.as_ref().and_then(|s| s.last_run),
        errors,
    }
}

pub struct HealthCheckHandler {
    pool: PgPool,
}

impl HealthCheckHandler {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskHandler for HealthCheckHandler {
    async fn handle(&self, task: &TaskPayload, ctx: TaskContext) -> Result<TaskOutcome, TaskError> {
        if !matches!(task, TaskPayload::HealthCheck) {
            return Err(TaskError::PayloadMismatch {
                expected: HEALTH_CHECK_TASK,
                actual: task.task_name(),
            });
        }

        let report = check_health(&self.pool).await;
        let summary = serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{report:?}"));

        if report.is_healthy() {
            info!(
                run_id = %ctx.run_id,
                recent_runs = ?report.recent_runs,
                pipeline_enabled = ?report.pipeline_enabled,
                next_run = ?report.next_run,
                "health check passed"
            );
            Ok(TaskOutcome {
                output: Some(summary),
                ..TaskOutcome::default()
            })
        } else {
            warn!(run_id = %ctx.run_id, errors = ?report.errors, "health check degraded");
            Err(TaskError::Unhealthy(report.errors.join("; ")))
        }
    }
}
