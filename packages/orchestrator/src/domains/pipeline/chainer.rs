//! Pipeline chaining.
//!
//! Follow-up work is declared as edges between task names and evaluated by
//! the worker after a handler succeeds; handlers never enqueue directly.
//!
//! ```text
//! Idle ─► ScrapeRunning ─┬─► ScrapeSucceeded ─► PersistQueued ─► PersistRunning ─┬─► PersistSucceeded
//!                        └─► ScrapeFailed                                         └─► PersistFailed
//! ```
//!
//! A failed persist stage is terminal for its lineage: the scrape stage is
//! never re-triggered.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::tasks::{TaskPayload, PERSIST_TASK, SCRAPE_TASK};
use crate::domains::runs::{JobRun, RunStatus};
use crate::kernel::jobs::TaskOutcome;

/// A declared follow-up: when `from` succeeds, `to` is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEdge {
    pub from: &'static str,
    pub to: &'static str,
}

pub const EDGES: &[ChainEdge] = &[ChainEdge {
    from: SCRAPE_TASK,
    to: PERSIST_TASK,
}];

/// Builds follow-up tasks for successful runs.
#[derive(Debug, Clone, Copy)]
pub struct PipelineChainer {
    persist_max_attempts: i32,
}

impl PipelineChainer {
    pub fn new(persist_max_attempts: i32) -> Self {
        Self {
            persist_max_attempts,
        }
    }

    /// Follow-up task and its attempt budget for a successful run, if any edge applies.
    pub fn follow_up(
        &self,
        task: &TaskPayload,
        outcome: &TaskOutcome,
        run_id: Uuid,
    ) -> Option<(TaskPayload, i32)> {
        let edge = EDGES.iter().find(|edge| edge.from == task.task_name())?;

        match edge.to {
            PERSIST_TASK => {
                let results_file = outcome.results_file.clone()?;
                Some((
                    TaskPayload::Persist {
                        results_file,
                        scraper_job_id: run_id,
                    },
                    self.persist_max_attempts,
                ))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Idle,
    ScrapeRunning,
    ScrapeSucceeded,
    ScrapeFailed,
    PersistQueued,
    PersistRunning,
    PersistSucceeded,
    PersistFailed,
}

impl PipelineState {
    /// Derive a lineage's state from its scrape run and the persist runs chained from it.
    ///
    /// `persist_pending` says whether a persist job for the lineage is still
    /// waiting in the queue (first attempt or retry).
    pub fn for_lineage(
        scrape: Option<&JobRun>,
        persist_runs: &[JobRun],
        persist_pending: bool,
    ) -> Self {
        let Some(scrape) = scrape else {
            return PipelineState::Idle;
        };

        match scrape.run_status() {
            Some(RunStatus::Running) => return PipelineState::ScrapeRunning,
            Some(RunStatus::Success) => {}
            _ => return PipelineState::ScrapeFailed,
        }

        let latest = persist_runs.iter().max_by_key(|run| run.started_at);
        match latest.and_then(JobRun::run_status) {
            Some(RunStatus::Running) => PipelineState::PersistRunning,
            Some(RunStatus::Success) => PipelineState::PersistSucceeded,
            _ if persist_pending => PipelineState::PersistQueued,
            Some(RunStatus::Error) => PipelineState::PersistFailed,
            None => PipelineState::ScrapeSucceeded,
        }
    }

    /// Load and derive the state of the lineage rooted at `scrape_run_id`.
    pub async fn load(scrape_run_id: Uuid, pool: &PgPool) -> Result<Self, sqlx::Error> {
        let scrape = JobRun::find_by_id(scrape_run_id, pool).await?;
        let persist_runs = JobRun::find_children(scrape_run_id, pool).await?;
        let pending = persist_pending(scrape_run_id, pool).await?;
        Ok(Self::for_lineage(scrape.as_ref(), &persist_runs, pending))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::ScrapeRunning => "scrape running",
            PipelineState::ScrapeSucceeded => "scrape succeeded",
            PipelineState::ScrapeFailed => "scrape failed",
            PipelineState::PersistQueued => "persist queued",
            PipelineState::PersistRunning => "persist running",
            PipelineState::PersistSucceeded => "persist succeeded",
            PipelineState::PersistFailed => "persist failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::ScrapeFailed
                | PipelineState::PersistSucceeded
                | PipelineState::PersistFailed
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a persist job chained from `scrape_run_id` is still queued.
pub async fn persist_pending(scrape_run_id: Uuid, pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM job_queue
            WHERE task_name = $1 AND payload->>'scraperJobId' = $2
        )
        "#,
    )
    .bind(PERSIST_TASK)
    .bind(scrape_run_id.to_string())
    .fetch_one(pool)
    .await
}
