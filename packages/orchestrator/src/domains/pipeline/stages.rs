//! Task handlers for the two external pipeline stages.
//!
//! Both stages launch a program through the process supervisor and judge
//! success from its exit code and the markers it prints:
//!
//! - scrape: exit 0 **and** a `Results saved to: <file>.json` line
//! - persist: exit 0; the four stat markers are recorded when present

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;

use super::markers::{self, RESULTS_MARKER};
use super::tasks::{TaskPayload, PERSIST_TASK, SCRAPE_TASK};
use crate::common::TaskError;
use crate::domains::runs::{JobRun, RunStats};
use crate::kernel::jobs::{TaskContext, TaskHandler, TaskOutcome};
use crate::kernel::supervisor::{launch, LaunchSpec, ProcessOutput};

/// How to invoke one stage program.
#[derive(Debug, Clone)]
pub struct StageCommand {
    pub program: String,
    /// Arguments placed before the per-run ones (usually the script path)
    pub base_args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl StageCommand {
    fn launch_spec(&self, label: &'static str, extra_args: Vec<String>) -> LaunchSpec {
        let mut args = self.base_args.clone();
        args.extend(extra_args);

        LaunchSpec {
            label,
            program: self.program.clone(),
            args,
            env: self.env.clone(),
            working_dir: Some(self.working_dir.clone()),
            timeout: self.timeout,
        }
    }
}

/// Commands and attempt budgets for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scrape: StageCommand,
    pub persist: StageCommand,
    pub scrape_max_attempts: i32,
    pub persist_max_attempts: i32,
    /// Pass `--delete` so the persist program removes the results file after loading it
    pub delete_results_after_persist: bool,
}

pub struct ScrapeStage {
    command: StageCommand,
}

impl ScrapeStage {
    pub fn new(command: StageCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl TaskHandler for ScrapeStage {
    async fn handle(&self, task: &TaskPayload, ctx: TaskContext) -> Result<TaskOutcome, TaskError> {
        let TaskPayload::Scrape { companies_file } = task else {
            return Err(TaskError::PayloadMismatch {
                expected: SCRAPE_TASK,
                actual: task.task_name(),
            });
        };

        let extra_args = match companies_file {
            Some(file) => vec!["--companies".to_string(), file.clone()],
            None => Vec::new(),
        };

        info!(
            run_id = %ctx.run_id,
            attempt = ctx.attempt,
            companies_file = ?companies_file,
            "starting scrape stage"
        );

        let output = launch(&self.command.launch_spec("scrape", extra_args)).await?;
        let log = checked_log("scrape", &output)?;

        let results_file =
            markers::results_file(&output.stdout).ok_or_else(|| TaskError::MissingMarker {
                stage: "scrape",
                marker: RESULTS_MARKER,
                output: log.clone(),
            })?;

        info!(
            run_id = %ctx.run_id,
            results_file = %results_file,
            duration_secs = output.duration.as_secs(),
            "scrape stage finished"
        );

        Ok(TaskOutcome {
            stats: RunStats::default(),
            output: Some(log),
            results_file: Some(results_file),
        })
    }
}

pub struct PersistStage {
    command: StageCommand,
    delete_results: bool,
    pool: PgPool,
}

impl PersistStage {
    pub fn new(command: StageCommand, delete_results: bool, pool: PgPool) -> Self {
        Self {
            command,
            delete_results,
            pool,
        }
    }

    /// Resolve a results path the scrape program printed relative to its working directory.
    pub fn resolve_results_path(&self, results_file: &str) -> PathBuf {
        resolve_against(&self.command.working_dir, results_file)
    }
}

#[async_trait]
impl TaskHandler for PersistStage {
    async fn handle(&self, task: &TaskPayload, ctx: TaskContext) -> Result<TaskOutcome, TaskError> {
        let TaskPayload::Persist {
            results_file,
            scraper_job_id,
        } = task
        else {
            return Err(TaskError::PayloadMismatch {
                expected: PERSIST_TASK,
                actual: task.task_name(),
            });
        };

        let parent = JobRun::find_by_id(*scraper_job_id, &self.pool)
            .await?
            .ok_or(TaskError::ParentRunMissing(*scraper_job_id))?;
        if !parent.is_success() {
            return Err(TaskError::ParentRunNotSucceeded {
                parent: parent.id,
                status: parent.status,
            });
        }

        // The file may have been removed since the scrape stage announced it
        let path = self.resolve_results_path(results_file);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(TaskError::ResultsFileNotFound(path));
        }

        let mut extra_args = vec![path.display().to_string()];
        if self.delete_results {
            extra_args.push("--delete".to_string());
        }

        info!(
            run_id = %ctx.run_id,
            attempt = ctx.attempt,
            scraper_job_id = %scraper_job_id,
            results_file = %path.display(),
            "starting persist stage"
        );

        let output = launch(&self.command.launch_spec("persist", extra_args)).await?;
        let log = checked_log("persist", &output)?;
        let stats = markers::persist_stats(&output.stdout);

        info!(
            run_id = %ctx.run_id,
            total_jobs_processed = stats.total_jobs_processed,
            jobs_saved = stats.jobs_saved,
            skipped_duplicates = stats.skipped_duplicates,
            errors = stats.errors_count,
            "persist stage finished"
        );

        Ok(TaskOutcome {
            stats,
            output: Some(log),
            results_file: None,
        })
    }
}

/// Combined output of a process that exited 0, or the failure it represents.
fn checked_log(stage: &'static str, output: &ProcessOutput) -> Result<String, TaskError> {
    let log = output.combined_log();
    if output.success() {
        Ok(log)
    } else {
        Err(TaskError::ProcessFailed {
            stage,
            exit_code: output.exit_code,
            output: log,
        })
    }
}

fn resolve_against(base: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
