use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::pipeline::{PipelineSettings, StageCommand};
use crate::kernel::jobs::JobWorkerConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Run-history and queue store
    pub database_url: String,
    /// Store the persist stage writes job listings into
    pub destination_database_url: String,
    /// Directory containing the external scraping program
    pub scraper_dir: PathBuf,
    pub python_bin: String,
    pub scraper_script: String,
    pub persist_script: String,
    pub scrape_cron: String,
    pub health_check_cron: String,
    pub poll_interval: Duration,
    pub scrape_timeout: Duration,
    pub persist_timeout: Duration,
    pub scrape_max_attempts: i32,
    pub persist_max_attempts: i32,
    pub delete_results_after_persist: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            destination_database_url: env::var("DESTINATION_DATABASE_URL")
                .unwrap_or_else(|_| database_url.clone()),
            database_url,
            scraper_dir: env::var("SCRAPER_DIR")
                .map(PathBuf::from)
                .context("SCRAPER_DIR must be set")?,
            python_bin: env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".to_string()),
            scraper_script: env::var("SCRAPER_SCRIPT")
                .unwrap_or_else(|_| "Final_Scraper.py".to_string()),
            persist_script: env::var("PERSIST_SCRIPT")
                .unwrap_or_else(|_| "database_pipeline.py".to_string()),
            scrape_cron: env::var("SCRAPE_CRON").unwrap_or_else(|_| "0 */6 * * *".to_string()),
            health_check_cron: env::var("HEALTH_CHECK_CRON")
                .unwrap_or_else(|_| "0 * * * *".to_string()),
            poll_interval: Duration::from_secs(parse_var("WORKER_POLL_INTERVAL_SECS", 2)?),
            scrape_timeout: Duration::from_secs(parse_var("SCRAPE_TIMEOUT_SECS", 4 * 60 * 60)?),
            persist_timeout: Duration::from_secs(parse_var("PERSIST_TIMEOUT_SECS", 60 * 60)?),
            scrape_max_attempts: parse_var("SCRAPE_MAX_ATTEMPTS", 2)?,
            persist_max_attempts: parse_var("PERSIST_MAX_ATTEMPTS", 3)?,
            delete_results_after_persist: parse_var("DELETE_RESULTS_AFTER_PERSIST", false)?,
        })
    }

    /// Commands and limits for the two pipeline stages.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let scrape = StageCommand {
            program: self.python_bin.clone(),
            base_args: vec![self.scraper_script.clone()],
            working_dir: self.scraper_dir.clone(),
            env: vec![("PYTHONIOENCODING".to_string(), "utf-8".to_string())],
            timeout: self.scrape_timeout,
        };

        let persist = StageCommand {
            program: self.python_bin.clone(),
            base_args: vec![self.persist_script.clone()],
            working_dir: self.scraper_dir.clone(),
            env: vec![
                ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
                (
                    "DATABASE_URL".to_string(),
                    self.destination_database_url.clone(),
                ),
            ],
            timeout: self.persist_timeout,
        };

        PipelineSettings {
            scrape,
            persist,
            scrape_max_attempts: self.scrape_max_attempts,
            persist_max_attempts: self.persist_max_attempts,
            delete_results_after_persist: self.delete_results_after_persist,
        }
    }

    pub fn worker_config(&self) -> JobWorkerConfig {
        JobWorkerConfig {
            poll_interval: self.poll_interval,
            ..Default::default()
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid value, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            database_url: "postgres://localhost/orchestrator".to_string(),
            destination_database_url: "postgres://localhost/jobs".to_string(),
            scraper_dir: PathBuf::from("/srv/scraper"),
            python_bin: "python3".to_string(),
            scraper_script: "Final_Scraper.py".to_string(),
            persist_script: "database_pipeline.py".to_string(),
            scrape_cron: "0 */6 * * *".to_string(),
            health_check_cron: "0 * * * *".to_string(),
            poll_interval: Duration::from_secs(2),
            scrape_timeout: Duration::from_secs(4 * 60 * 60),
            persist_timeout: Duration::from_secs(60 * 60),
            scrape_max_attempts: 2,
            persist_max_attempts: 3,
            delete_results_after_persist: true,
        }
    }

    #[test]
    fn test_persist_stage_targets_destination_store() {
        let settings = config().pipeline_settings();

        assert_eq!(settings.persist.base_args, vec!["database_pipeline.py"]);
        assert!(settings
            .persist
            .env
            .contains(&("DATABASE_URL".to_string(), "postgres://localhost/jobs".to_string())));
        assert!(!settings.scrape.env.iter().any(|(key, _)| key == "DATABASE_URL"));
        assert!(settings.delete_results_after_persist);
    }

    #[test]
    fn test_stage_timeouts_follow_config() {
        let settings = config().pipeline_settings();
        assert_eq!(settings.scrape.timeout, Duration::from_secs(14_400));
        assert_eq!(settings.persist.timeout, Duration::from_secs(3_600));
        assert_eq!(settings.scrape.working_dir, PathBuf::from("/srv/scraper"));
    }
}
