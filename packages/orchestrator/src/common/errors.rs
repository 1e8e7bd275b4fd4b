//! Error taxonomy for the orchestrator.
//!
//! - [`ClaimError`] - the queue store or a claimed job's shape is unusable;
//!   aborts only the current poll tick.
//! - [`TaskError`] - a handler failed; recorded on the run row and fed into
//!   attempt bookkeeping.
//! - [`WorkerError`] - everything a single poll tick can surface, including
//!   the chain failure where a successful scrape could not enqueue its
//!   persist stage.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::domains::runs::LedgerError;
use crate::kernel::jobs::ErrorKind;
use crate::kernel::supervisor::LaunchError;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("queue store unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unknown task name: {0}")]
    UnknownTask(String),

    #[error("invalid payload for task {task_name}: {source}")]
    InvalidPayload {
        task_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no handler registered for task {0}")]
    UnregisteredTask(String),
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{stage} process exited with code {}", exit_code_label(.exit_code))]
    ProcessFailed {
        stage: &'static str,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("{stage} process exited 0 without printing the \"{marker}\" marker")]
    MissingMarker {
        stage: &'static str,
        marker: &'static str,
        output: String,
    },

    #[error("results file not found: {}", .0.display())]
    ResultsFileNotFound(PathBuf),

    #[error("scrape run {0} referenced by the persist stage does not exist")]
    ParentRunMissing(Uuid),

    #[error("scrape run {parent} has status {status}, expected success")]
    ParentRunNotSucceeded { parent: Uuid, status: String },

    #[error("handler for {expected} received a {actual} payload")]
    PayloadMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("health check degraded: {0}")]
    Unhealthy(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Whether the failure is transient and worth another attempt.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::ProcessFailed { .. }
            | TaskError::Launch(_)
            | TaskError::Database(_)
            | TaskError::Panicked(_) => ErrorKind::Retryable,
            TaskError::MissingMarker { .. }
            | TaskError::ResultsFileNotFound(_)
            | TaskError::ParentRunMissing(_)
            | TaskError::ParentRunNotSucceeded { .. }
            | TaskError::PayloadMismatch { .. }
            | TaskError::Unhealthy(_) => ErrorKind::NonRetryable,
        }
    }

    /// Console output captured before the failure, if a process ran.
    pub fn output(&self) -> Option<&str> {
        match self {
            TaskError::ProcessFailed { output, .. } | TaskError::MissingMarker { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none (terminated by signal)".to_string(),
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("claim failure: {0}")]
    Claim(#[from] ClaimError),

    #[error("run ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("chain failure: run {run_id} succeeded but enqueueing {task_name} failed: {source}")]
    Chain {
        run_id: Uuid,
        task_name: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to record outcome of job {job_id}: {source}")]
    Bookkeeping {
        job_id: Uuid,
        #[source]
        source: sqlx::Error,
    },
}
