//! Scrape pipeline orchestrator CLI.
//!
//! - `run [companies_file]` - start the worker and cron trigger, enqueue a scrape now
//! - `queue [companies_file]` - enqueue a scrape and exit
//! - `status [--limit N]` - print recent runs

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use orchestrator_core::domains::pipeline::{
    task_registry, PipelineChainer, PipelineState, TaskPayload, SCRAPE_TASK,
};
use orchestrator_core::domains::runs::{report, RunLedger, SchedulerConfig};
use orchestrator_core::kernel::jobs::{
    JobWorker, PostgresJobQueue, QueuedJob, DEFAULT_MAX_ATTEMPTS,
};
use orchestrator_core::kernel::{start_cron_trigger, CronTrigger, ScheduledTask};
use orchestrator_core::Config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Runs the scrape → persist job pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the worker and cron trigger, and enqueue a scrape immediately
    Run {
        /// Companies file passed to the scraper
        companies_file: Option<String>,
    },

    /// Enqueue a scrape and exit
    Queue {
        /// Companies file passed to the scraper
        companies_file: Option<String>,
    },

    /// Show recent runs
    Status {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,orchestrator_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = connect(&config).await?;

    match cli.command {
        Commands::Run { companies_file } => cmd_run(config, pool, companies_file).await,
        Commands::Queue { companies_file } => cmd_queue(&config, pool, companies_file).await,
        Commands::Status { limit } => cmd_status(pool, limit).await,
    }
}

async fn connect(config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Database ready");

    Ok(pool)
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_run(config: Config, pool: PgPool, companies_file: Option<String>) -> Result<()> {
    let settings = config.pipeline_settings();

    let trigger = Arc::new(CronTrigger::new(
        pool.clone(),
        vec![
            ScheduledTask::new(
                config.scrape_cron.clone(),
                TaskPayload::scrape(None),
                settings.scrape_max_attempts,
            ),
            ScheduledTask::new(
                config.health_check_cron.clone(),
                TaskPayload::HealthCheck,
                DEFAULT_MAX_ATTEMPTS,
            ),
        ],
    ));
    let mut scheduler = start_cron_trigger(trigger)
        .await
        .context("Failed to start cron trigger")?;

    let queue = PostgresJobQueue::new(pool.clone());
    let job_id = queue
        .enqueue(&TaskPayload::scrape(companies_file), settings.scrape_max_attempts)
        .await
        .context("Failed to enqueue scrape")?;
    tracing::info!(job_id = %job_id, "initial scrape enqueued");

    let worker = JobWorker::new(
        queue,
        Arc::new(task_registry(&settings, pool.clone())),
        RunLedger::new(pool),
        PipelineChainer::new(settings.persist_max_attempts),
        config.worker_config(),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let signal = shutdown_signal().await;
        tracing::info!(signal, "Shutdown requested, finishing current job before exit");
        signal_token.cancel();
    });

    worker.run(shutdown).await;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "cron trigger did not shut down cleanly");
    }
    Ok(())
}

/// Wait for Ctrl-C or, on Unix, SIGTERM from a service manager.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "SIGINT"
    }
}

async fn cmd_queue(config: &Config, pool: PgPool, companies_file: Option<String>) -> Result<()> {
    let queue = PostgresJobQueue::new(pool);
    let job_id = queue
        .enqueue(&TaskPayload::scrape(companies_file), config.scrape_max_attempts)
        .await
        .context("Failed to enqueue scrape")?;

    println!("{} {}", "Queued scrape job".green(), job_id);
    Ok(())
}

async fn cmd_status(pool: PgPool, limit: i64) -> Result<()> {
    let ledger = RunLedger::new(pool.clone());
    let runs = ledger.recent(limit).await.context("Failed to load runs")?;

    println!("{}", format!("Last {} runs", runs.len()).bold());
    if runs.is_empty() {
        println!("  (no runs recorded)");
    }
    for run in &runs {
        let lineage = if run.job_name == SCRAPE_TASK {
            Some(
                PipelineState::load(run.id, &pool)
                    .await
                    .context("Failed to load pipeline state")?,
            )
        } else {
            None
        };
        println!("{}", report::render_run(run, lineage));
    }

    let pending = QueuedJob::find_pending(&pool)
        .await
        .context("Failed to load queue")?;
    println!();
    println!("{} {}", "Queued jobs:".bold(), pending.len());
    for job in &pending {
        println!(
            "  {} {} attempt {}/{} due {}",
            job.id,
            job.task_name,
            job.attempt_count + 1,
            job.max_attempts,
            job.run_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    let schedules = SchedulerConfig::find_all(&pool)
        .await
        .context("Failed to load schedules")?;
    println!();
    println!("{}", "Schedules:".bold());
    for schedule in schedules {
        let state = if schedule.enabled {
            "enabled".green()
        } else {
            "disabled".red()
        };
        let next = schedule
            .next_run
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<16} {:<14} {} next {}",
            schedule.job_name, schedule.cron_pattern, state, next
        );
    }

    Ok(())
}
