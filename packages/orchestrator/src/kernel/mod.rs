//! Infrastructure the pipeline runs on: the Postgres job queue and worker,
//! the cron trigger and the subprocess supervisor.

pub mod jobs;
pub mod scheduled_tasks;
pub mod supervisor;

pub use scheduled_tasks::{start_cron_trigger, CronTrigger, ScheduledTask};
pub use supervisor::{launch, LaunchError, LaunchSpec, ProcessOutput};
