//! The scrape → persist pipeline and the health check that watches it.
//!
//! - [`tasks`] - task names and the [`TaskPayload`] union decoded at claim time
//! - [`markers`] - parser for the text markers the stage programs print
//! - [`chainer`] - declared follow-up edges and lineage state
//! - [`stages`] - task handlers launching the external stage programs
//! - [`health`] - read-only health report

pub mod chainer;
pub mod health;
pub mod markers;
pub mod stages;
pub mod tasks;

pub use chainer::{PipelineChainer, PipelineState};
pub use health::{check_health, HealthCheckHandler, HealthReport, HealthStatus};
pub use stages::{PersistStage, PipelineSettings, ScrapeStage, StageCommand};
pub use tasks::{TaskPayload, HEALTH_CHECK_TASK, PERSIST_TASK, SCRAPE_TASK};

use std::sync::Arc;

use sqlx::PgPool;

use crate::kernel::jobs::TaskRegistry;

/// Registry with the scrape, persist and health-check handlers.
pub fn task_registry(settings: &PipelineSettings, pool: PgPool) -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry.register(SCRAPE_TASK, Arc::new(ScrapeStage::new(settings.scrape.clone())));
    registry.register(
        PERSIST_TASK,
        Arc::new(PersistStage::new(
            settings.persist.clone(),
            settings.delete_results_after_persist,
            pool.clone(),
        )),
    );
    registry.register(HEALTH_CHECK_TASK, Arc::new(HealthCheckHandler::new(pool)));
    registry
}
