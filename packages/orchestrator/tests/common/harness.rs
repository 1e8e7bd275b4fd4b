//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by all tests in a binary. Each harness
//! gets its own freshly migrated database inside it, so the queue, the
//! advisory execution lock and the run ledger are isolated per test.

use std::sync::Arc;

use anyhow::{Context, Result};
use orchestrator_core::domains::pipeline::{task_registry, PipelineChainer, PipelineSettings};
use orchestrator_core::domains::runs::RunLedger;
use orchestrator_core::kernel::jobs::{JobWorker, JobWorkerConfig, PostgresJobQueue};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    /// Server URL without a database name
    server_url: String,
    admin_pool: PgPool,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        // Run tests with: RUST_LOG=debug cargo test -- --nocapture
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .with_tag("16")
            .with_cmd(["-c", "max_connections=200"])
            .start()
            .await
            .context("Failed to start Postgres container")?;

        let pg_host = postgres.get_host().await?;
        let pg_port = postgres.get_host_port_ipv4(5432).await?;
        let server_url = format!("postgresql://postgres:postgres@{}:{}", pg_host, pg_port);

        let admin_pool = PgPool::connect(&format!("{server_url}/postgres"))
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self {
            server_url,
            admin_pool,
            _postgres: postgres,
        })
    }

    async fn get() -> &'static Self {
        SHARED_INFRA
            .get_or_init(|| async {
                Self::init()
                    .await
                    .expect("Failed to initialize shared test infrastructure")
            })
            .await
    }
}

/// Per-test database plus helpers to build the pipeline components on it.
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let queue = ctx.queue();
/// }
/// ```
pub struct TestHarness {
    pub db_pool: PgPool,
    pub db_url: String,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new().await.expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;

        let db_name = format!("orchestrator_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE {db_name}"))
            .execute(&infra.admin_pool)
            .await
            .context("Failed to create test database")?;

        let db_url = format!("{}/{}", infra.server_url, db_name);
        let db_pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .context("Failed to connect to test database")?;

        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { db_pool, db_url })
    }

    pub fn queue(&self) -> PostgresJobQueue {
        PostgresJobQueue::new(self.db_pool.clone())
    }

    pub fn ledger(&self) -> RunLedger {
        RunLedger::new(self.db_pool.clone())
    }

    /// Worker wired with the real handlers; retries are due immediately.
    pub fn worker(&self, settings: &PipelineSettings) -> JobWorker {
        let config = JobWorkerConfig {
            retry_delay: std::time::Duration::ZERO,
            ..JobWorkerConfig::with_worker_id("test-worker")
        };

        JobWorker::new(
            self.queue(),
            Arc::new(task_registry(settings, self.db_pool.clone())),
            self.ledger(),
            PipelineChainer::new(settings.persist_max_attempts),
            config,
        )
    }
}
