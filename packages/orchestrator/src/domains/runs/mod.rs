//! Run history: the `job_runs` audit ledger and the `scheduler_config` rows
//! the cron trigger evaluates.

mod ledger;
pub mod models;
pub mod report;

pub use ledger::{LedgerError, RunLedger, TrackedRun, OUTPUT_LOG_LIMIT};
pub use models::{JobRun, RunStats, RunStatus, SchedulerConfig};
