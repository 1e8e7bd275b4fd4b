//! Cron trigger using tokio-cron-scheduler.
//!
//! Once per minute the trigger evaluates every `scheduler_config` row against
//! the minute boundary and enqueues the declared task for each match.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (every minute, "0 * * * * *")
//!     │
//!     └─► CronTrigger.evaluate(tick)
//!             └─► For each enabled row matching tick, in one transaction:
//!                     ├─► claim tick (UPDATE ... WHERE last_run < tick)
//!                     └─► PostgresJobQueue::insert
//! ```
//!
//! The tick claim makes evaluation idempotent: running the same boundary
//! twice, or from two processes, enqueues at most one job.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use cron::Schedule;
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::pipeline::TaskPayload;
use crate::domains::runs::SchedulerConfig;
use crate::kernel::jobs::PostgresJobQueue;

/// A task enqueued on a cron schedule.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub cron_pattern: String,
    pub payload: TaskPayload,
    pub max_attempts: i32,
}

impl ScheduledTask {
    pub fn new(cron_pattern: impl Into<String>, payload: TaskPayload, max_attempts: i32) -> Self {
        Self {
            cron_pattern: cron_pattern.into(),
            payload,
            max_attempts,
        }
    }

    /// Schedule row key; one schedule per task name.
    pub fn job_name(&self) -> &'static str {
        self.payload.task_name()
    }
}

pub struct CronTrigger {
    pool: PgPool,
    tasks: Vec<ScheduledTask>,
}

impl CronTrigger {
    pub fn new(pool: PgPool, tasks: Vec<ScheduledTask>) -> Self {
        Self { pool, tasks }
    }

    /// Write the configured schedules to `scheduler_config`.
    ///
    /// Patterns are refreshed from configuration; a row's `enabled` flag is kept.
    pub async fn sync_config(&self) -> Result<Vec<SchedulerConfig>, sqlx::Error> {
        let now = Utc::now();
        let mut rows = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let next_run = match parse_schedule(&task.cron_pattern) {
                Ok(schedule) => next_fire(&schedule, now),
                Err(e) => {
                    warn!(job_name = task.job_name(), cron_pattern = %task.cron_pattern, error = %e, "invalid cron pattern");
                    None
                }
            };

            let row =
                SchedulerConfig::upsert(task.job_name(), &task.cron_pattern, next_run, &self.pool)
                    .await?;
            info!(
                job_name = %row.job_name,
                cron_pattern = %row.cron_pattern,
                enabled = row.enabled,
                next_run = ?row.next_run,
                "schedule registered"
            );
            rows.push(row);
        }

        Ok(rows)
    }

    /// Evaluate all schedules against the minute containing `tick`.
    ///
    /// Returns the ids of the jobs enqueued. A row that cannot be evaluated
    /// is logged and skipped.
    pub async fn evaluate(&self, tick: DateTime<Utc>) -> Result<Vec<Uuid>, sqlx::Error> {
        let tick = truncate_to_minute(tick);
        let rows = SchedulerConfig::find_all(&self.pool).await?;
        let mut enqueued = Vec::new();

        for row in rows {
            let Some(task) = self.tasks.iter().find(|t| t.job_name() == row.job_name) else {
                debug!(job_name = %row.job_name, "no task declared for schedule row");
                continue;
            };
            if !row.enabled {
                continue;
            }

            let schedule = match parse_schedule(&row.cron_pattern) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(job_name = %row.job_name, cron_pattern = %row.cron_pattern, error = %e, "skipping invalid cron pattern");
                    continue;
                }
            };

            let next_run = next_fire(&schedule, tick);

            if !matches(&schedule, tick) {
                if row.next_run != next_run {
                    if let Err(e) = SchedulerConfig::set_next_run(&row.job_name, next_run, &self.pool).await {
                        warn!(job_name = %row.job_name, error = %e, "failed to refresh next_run");
                    }
                }
                continue;
            }

            match self.fire(task, tick, next_run).await {
                Ok(Some(job_id)) => {
                    info!(job_name = %row.job_name, job_id = %job_id, tick = %tick, "scheduled task enqueued");
                    enqueued.push(job_id);
                }
                Ok(None) => {
                    debug!(job_name = %row.job_name, tick = %tick, "tick already claimed");
                }
                Err(e) => {
                    error!(job_name = %row.job_name, tick = %tick, error = %e, "failed to enqueue scheduled task");
                }
            }
        }

        Ok(enqueued)
    }

    async fn fire(
        &self,
        task: &ScheduledTask,
        tick: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<Option<Uuid>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        if !SchedulerConfig::claim_tick(task.job_name(), tick, next_run, &mut *tx).await? {
            tx.rollback().await?;
            return Ok(None);
        }

        let job_id = PostgresJobQueue::insert(&mut *tx, &task.payload, task.max_attempts).await?;
        tx.commit().await?;

        Ok(Some(job_id))
    }
}

/// Start the minute tick driving `trigger`.
pub async fn start_cron_trigger(trigger: Arc<CronTrigger>) -> Result<JobScheduler> {
    trigger.sync_config().await?;

    let scheduler = JobScheduler::new().await?;

    let tick_trigger = trigger.clone();
    let tick_job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
        let trigger = tick_trigger.clone();
        Box::pin(async move {
            if let Err(e) = trigger.evaluate(Utc::now()).await {
                error!(error = %e, "cron trigger evaluation failed");
            }
        })
    })?;

    scheduler.add(tick_job).await?;
    scheduler.start().await?;

    info!(
        schedules = trigger.tasks.len(),
        "cron trigger started (evaluating every minute)"
    );
    Ok(scheduler)
}

/// Accept classic 5-field patterns by adding a seconds field.
pub fn normalize_pattern(pattern: &str) -> String {
    let pattern = pattern.trim();
    if pattern.split_whitespace().count() == 5 {
        format!("0 {pattern}")
    } else {
        pattern.to_string()
    }
}

pub fn parse_schedule(pattern: &str) -> Result<Schedule, cron::error::Error> {
    Schedule::from_str(&normalize_pattern(pattern))
}

/// Whether `tick` is one of the schedule's fire times.
pub fn matches(schedule: &Schedule, tick: DateTime<Utc>) -> bool {
    schedule.after(&(tick - Duration::seconds(1))).next() == Some(tick)
}

/// First fire time strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

fn truncate_to_minute(tick: DateTime<Utc>) -> DateTime<Utc> {
    tick.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(tick)
}
