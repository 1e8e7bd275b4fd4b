//! Job infrastructure for background task execution.
//!
//! - [`PostgresJobQueue`] - durable queue backed by the `job_queue` table
//! - [`TaskRegistry`] - maps task names to handlers
//! - [`JobWorker`] - long-running loop that claims and executes jobs one at a time
//! - [`QueuedJob`] - queue row model
//!
//! # Architecture
//!
//! ```text
//! CronTrigger / CLI / PipelineChainer
//!     │
//!     └─► PostgresJobQueue.enqueue()
//!             └─► INSERT INTO job_queue
//!
//! JobWorker (concurrency = 1)
//!     │
//!     ├─► claim (advisory xact lock + FOR UPDATE SKIP LOCKED, tx held for the job)
//!     ├─► decode TaskPayload, look up handler (TaskRegistry)
//!     ├─► RunLedger.track(handler)      ── job_runs row start/finish
//!     └─► complete (archive + chained follow-up) / fail (retry or archive)
//! ```

mod job;
mod queue;
mod registry;
mod worker;

pub use job::{ArchivedJob, ErrorKind, QueuedJob};
pub use queue::{ClaimedJob, FailureOutcome, PostgresJobQueue, DEFAULT_MAX_ATTEMPTS};
pub use registry::{SharedTaskRegistry, TaskContext, TaskHandler, TaskOutcome, TaskRegistry};
pub use worker::{ExecutionOutcome, JobExecution, JobWorker, JobWorkerConfig};
