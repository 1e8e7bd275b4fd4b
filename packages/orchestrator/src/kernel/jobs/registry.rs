//! Task registry for dispatching claimed jobs.
//!
//! The registry maps task names (e.g. "scrape-jobs") to the handler that
//! executes them. Payloads are already decoded into a [`TaskPayload`] by the
//! time a handler sees them.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = TaskRegistry::new();
//! registry.register(SCRAPE_TASK, Arc::new(ScrapeStage::new(settings.scrape.clone())));
//! registry.register(PERSIST_TASK, Arc::new(PersistStage::new(settings.persist.clone(), false, pool.clone())));
//!
//! let worker = JobWorker::new(queue, Arc::new(registry), ledger, chainer, config);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::common::TaskError;
use crate::domains::pipeline::TaskPayload;
use crate::domains::runs::RunStats;

/// Per-invocation data handed to a handler.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    /// The `job_runs` row tracking this invocation
    pub run_id: Uuid,
    /// The `job_queue` row being executed
    pub job_id: Uuid,
    /// 1-based attempt number
    pub attempt: i32,
}

/// Result of a successful handler invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutcome {
    pub stats: RunStats,
    /// Captured console output stored on the run row
    pub output: Option<String>,
    /// Results file announced by the scrape stage
    pub results_file: Option<String>,
}

/// Handler trait for executing one kind of task.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskPayload, ctx: TaskContext) -> Result<TaskOutcome, TaskError>;
}

/// Registry that maps task names to handlers.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    handlers: HashMap<&'static str, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for a task name, replacing any previous one.
    pub fn register(&mut self, task_name: &'static str, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_name, handler);
    }

    pub fn get(&self, task_name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_name).cloned()
    }

    /// Check if a task name is registered.
    pub fn is_registered(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name)
    }

    /// Get all registered task names.
    pub fn registered_tasks(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.registered_tasks())
            .finish()
    }
}

/// Thread-safe registry wrapped in Arc.
pub type SharedTaskRegistry = Arc<TaskRegistry>;
