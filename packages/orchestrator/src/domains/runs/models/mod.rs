mod job_run;
mod scheduler_config;

pub use job_run::{JobRun, RunStats, RunStatus};
pub use scheduler_config::SchedulerConfig;
