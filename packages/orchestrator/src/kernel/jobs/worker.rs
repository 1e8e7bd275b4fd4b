//! Job worker service for executing queued tasks.
//!
//! The `JobWorker` is a long-running service that:
//! - Polls the queue for a due job (one at a time, globally)
//! - Decodes the payload into a [`TaskPayload`] and looks up its handler
//! - Runs the handler inside a [`RunLedger`] run
//! - Archives the job with its chained follow-up, or records the failed attempt
//!
//! # Architecture
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► PostgresJobQueue.claim()        (tx held until the outcome is written)
//!     ├─► TaskPayload::decode + TaskRegistry.get
//!     ├─► RunLedger.track(handler.handle(task, ctx))
//!     └─► ClaimedJob.complete(follow_up) / ClaimedJob.fail(error, kind)
//! ```
//!
//! On shutdown the loop stops claiming; a job already running is awaited to
//! completion, subprocess included.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::queue::{ClaimedJob, FailureOutcome, PostgresJobQueue};
use super::registry::{SharedTaskRegistry, TaskContext, TaskHandler};
use crate::common::{ClaimError, WorkerError};
use crate::domains::pipeline::{PipelineChainer, TaskPayload};
use crate::domains::runs::RunLedger;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How long to wait when no jobs are available
    pub poll_interval: Duration,
    /// Base delay before retrying a failed job; doubles per failed attempt
    pub retry_delay: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            retry_delay: Duration::from_secs(60),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

/// How a claimed job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Archived as completed; `follow_up` is the chained job, if any
    Succeeded { follow_up: Option<Uuid> },
    /// Re-queued for another attempt at `run_at`
    Retrying {
        attempt_count: i32,
        run_at: DateTime<Utc>,
        error: String,
    },
    /// Archived as failed
    Failed { attempt_count: i32, error: String },
}

/// Record of one executed job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub job_id: Uuid,
    pub task_name: &'static str,
    pub run_id: Uuid,
    pub outcome: ExecutionOutcome,
}

/// Executes queued jobs one at a time.
pub struct JobWorker {
    queue: PostgresJobQueue,
    registry: SharedTaskRegistry,
    ledger: RunLedger,
    chainer: PipelineChainer,
    config: JobWorkerConfig,
}

impl JobWorker {
    pub fn new(
        queue: PostgresJobQueue,
        registry: SharedTaskRegistry,
        ledger: RunLedger,
        chainer: PipelineChainer,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            registry,
            ledger,
            chainer,
            config,
        }
    }

    pub fn config(&self) -> &JobWorkerConfig {
        &self.config
    }

    /// Poll until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            tasks = ?self.registry.registered_tasks(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_next_job().await {
                // Look for more work straight away
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker_id = %self.config.worker_id, error = %e, "poll tick failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
    }

    /// Execute due jobs until none is left. Jobs re-queued with a backoff are not waited for.
    pub async fn run_until_idle(&self) -> Result<Vec<JobExecution>, WorkerError> {
        let mut executions = Vec::new();
        while let Some(execution) = self.run_next_job().await? {
            executions.push(execution);
        }
        Ok(executions)
    }

    /// Claim and execute at most one job.
    ///
    /// Returns `Ok(None)` when nothing is due. A handler failure is not an
    /// error here; it is recorded and reported through [`ExecutionOutcome`].
    pub async fn run_next_job(&self) -> Result<Option<JobExecution>, WorkerError> {
        let Some(claimed) = self
            .queue
            .claim(&self.config.worker_id)
            .await
            .map_err(ClaimError::from)?
        else {
            return Ok(None);
        };

        let job_id = claimed.id();
        let attempt = claimed.job().attempt_count + 1;

        let (task, handler) = match self.resolve(&claimed) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!(job_id = %job_id, task_name = %claimed.job().task_name, error = %e, "rejecting unusable job");
                claimed
                    .fail_permanently(&e.to_string())
                    .await
                    .map_err(|source| WorkerError::Bookkeeping { job_id, source })?;
                return Err(e.into());
            }
        };

        let task_name = task.task_name();
        debug!(job_id = %job_id, task_name, attempt, "claimed job");

        let task_ref = &task;
        let tracked = self
            .ledger
            .track(task_name, task.parent_run_id(), move |run_id| async move {
                let ctx = TaskContext {
                    run_id,
                    job_id,
                    attempt,
                };
                handler.handle(task_ref, ctx).await
            })
            .await?;

        let run_id = tracked.run.id;

        let outcome = match tracked.result {
            Ok(outcome) => {
                let follow_up = self.chainer.follow_up(&task, &outcome, run_id);
                let follow_up_id = claimed
                    .complete(follow_up.as_ref().map(|(next, max_attempts)| (next, *max_attempts)))
                    .await
                    .map_err(|source| match &follow_up {
                        Some((next, _)) => {
                            error!(
                                job_id = %job_id,
                                run_id = %run_id,
                                follow_up = next.task_name(),
                                error = %source,
                                "chain failure: follow-up not enqueued, job left queued"
                            );
                            WorkerError::Chain {
                                run_id,
                                task_name: next.task_name(),
                                source,
                            }
                        }
                        None => WorkerError::Bookkeeping { job_id, source },
                    })?;

                info!(
                    job_id = %job_id,
                    run_id = %run_id,
                    task_name,
                    follow_up = ?follow_up_id,
                    "job succeeded"
                );
                ExecutionOutcome::Succeeded {
                    follow_up: follow_up_id,
                }
            }
            Err(task_error) => {
                let message = task_error.to_string();
                let failure = claimed
                    .fail(&message, task_error.kind(), self.config.retry_delay)
                    .await
                    .map_err(|source| WorkerError::Bookkeeping { job_id, source })?;

                match failure {
                    FailureOutcome::Retrying {
                        attempt_count,
                        run_at,
                    } => {
                        warn!(
                            job_id = %job_id,
                            run_id = %run_id,
                            task_name,
                            attempt_count,
                            run_at = %run_at,
                            error = %message,
                            "job failed, will retry"
                        );
                        ExecutionOutcome::Retrying {
                            attempt_count,
                            run_at,
                            error: message,
                        }
                    }
                    FailureOutcome::Failed { attempt_count } => {
                        error!(
                            job_id = %job_id,
                            run_id = %run_id,
                            task_name,
                            attempt_count,
                            error = %message,
                            "job failed permanently"
                        );
                        ExecutionOutcome::Failed {
                            attempt_count,
                            error: message,
                        }
                    }
                }
            }
        };

        Ok(Some(JobExecution {
            job_id,
            task_name,
            run_id,
            outcome,
        }))
    }

    fn resolve(
        &self,
        claimed: &ClaimedJob,
    ) -> Result<(TaskPayload, Arc<dyn TaskHandler>), ClaimError> {
        let job = claimed.job();
        let task = TaskPayload::decode(&job.task_name, &job.payload)?;
        let handler = self
            .registry
            .get(task.task_name())
            .ok_or_else(|| ClaimError::UnregisteredTask(job.task_name.clone()))?;
        Ok((task, handler))
    }
}
