//! Task names and payloads.
//!
//! Payloads are stored as JSON in `job_queue.payload` and decoded into a
//! [`TaskPayload`] when a job is claimed, keyed by the row's task name.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::common::ClaimError;

pub const SCRAPE_TASK: &str = "scrape-jobs";
pub const PERSIST_TASK: &str = "save-jobs-to-db";
pub const HEALTH_CHECK_TASK: &str = "health-check";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeArgs {
    #[serde(default)]
    companies_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistArgs {
    results_file: String,
    scraper_job_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPayload {
    /// Run the external scraper, optionally over a specific companies file
    Scrape { companies_file: Option<String> },
    /// Load a results file produced by the scrape run `scraper_job_id`
    Persist {
        results_file: String,
        scraper_job_id: Uuid,
    },
    HealthCheck,
}

impl TaskPayload {
    pub fn scrape(companies_file: Option<String>) -> Self {
        TaskPayload::Scrape { companies_file }
    }

    /// Decode a queue row's payload.
    pub fn decode(task_name: &str, payload: &Value) -> Result<Self, ClaimError> {
        let invalid = |source| ClaimError::InvalidPayload {
            task_name: task_name.to_string(),
            source,
        };

        match task_name {
            SCRAPE_TASK => {
                let args: ScrapeArgs = serde_json::from_value(payload.clone()).map_err(invalid)?;
                Ok(TaskPayload::Scrape {
                    companies_file: args.companies_file,
                })
            }
            PERSIST_TASK => {
                let args: PersistArgs = serde_json::from_value(payload.clone()).map_err(invalid)?;
                Ok(TaskPayload::Persist {
                    results_file: args.results_file,
                    scraper_job_id: args.scraper_job_id,
                })
            }
            HEALTH_CHECK_TASK => Ok(TaskPayload::HealthCheck),
            other => Err(ClaimError::UnknownTask(other.to_string())),
        }
    }

    pub fn task_name(&self) -> &'static str {
        match self {
            TaskPayload::Scrape { .. } => SCRAPE_TASK,
            TaskPayload::Persist { .. } => PERSIST_TASK,
            TaskPayload::HealthCheck => HEALTH_CHECK_TASK,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            TaskPayload::Scrape {
                companies_file: Some(file),
            } => json!({ "companiesFile": file }),
            TaskPayload::Scrape {
                companies_file: None,
            } => json!({}),
            TaskPayload::Persist {
                results_file,
                scraper_job_id,
            } => json!({
                "resultsFile": results_file,
                "scraperJobId": scraper_job_id,
            }),
            TaskPayload::HealthCheck => json!({}),
        }
    }

    /// Run this task's run row should point at as its parent.
    pub fn parent_run_id(&self) -> Option<Uuid> {
        match self {
            TaskPayload::Persist { scraper_job_id, .. } => Some(*scraper_job_id),
            _ => None,
        }
    }
}
