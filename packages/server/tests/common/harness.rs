//! Test harness with testcontainers for integration testing.
//!
//! One Postgres container is shared by all tests and started on first use.
//! Queue tests dequeue "whatever is visible", so every harness gets its own
//! freshly migrated database inside that container.

use anyhow::{Context, Result};
use relay_core::kernel::event_queue::{PostgresEventQueue, QueueConfig};
use sqlx::PgPool;
use test_context::AsyncTestContext;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

/// Shared test infrastructure that persists across all tests.
struct SharedTestInfra {
    host: String,
    port: u16,
    admin_pool: PgPool,
    // Keep the container alive for the entire test run
    _postgres: ContainerAsync<Postgres>,
}

/// Global shared infrastructure - initialized once, reused by all tests.
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

        let host = postgres.get_host().await?.to_string();
        let port = postgres.get_host_port_ipv4(5432).await?;

        let admin_pool = PgPool::connect(&database_url(&host, port, "postgres"))
            .await
            .context("Failed to connect to Postgres")?;

        Ok(Self {
            host,
            port,
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

    /// Create an empty database and apply the queue migrations to it.
    async fn fresh_database(&self) -> Result<PgPool> {
        let name = format!("relay_test_{}", Uuid::new_v4().simple());

        sqlx::query(&format!("CREATE DATABASE \"{}\"", name))
            .execute(&self.admin_pool)
            .await
            .with_context(|| format!("Failed to create database {}", name))?;

        let pool = PgPool::connect(&database_url(&self.host, self.port, &name))
            .await
            .context("Failed to connect to test database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(pool)
    }
}

fn database_url(host: &str, port: u16, database: &str) -> String {
    format!(
        "postgresql://postgres:postgres@{}:{}/{}",
        host, port, database
    )
}

/// Test harness that manages test infrastructure.
///
/// # Example using test-context
///
/// ```ignore
/// use test_context::test_context;
///
/// #[test_context(TestHarness)]
/// #[tokio::test]
/// async fn my_test(ctx: &TestHarness) {
///     let queue = ctx.queue();
///     // ... test code
/// }
/// ```
pub struct TestHarness {
    /// Pool for this test's private database.
    pub db_pool: PgPool,
}

impl AsyncTestContext for TestHarness {
    async fn setup() -> Self {
        Self::new()
            .await
            .expect("Failed to create test harness")
    }

    async fn teardown(self) {
        self.db_pool.close().await;
    }
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let infra = SharedTestInfra::get().await;
        let db_pool = infra.fresh_database().await?;
        Ok(Self { db_pool })
    }

    /// Queue with the production lease and dedup windows
    pub fn queue(&self) -> PostgresEventQueue {
        PostgresEventQueue::new(self.db_pool.clone(), QueueConfig::default())
    }

    pub fn queue_with(&self, config: QueueConfig) -> PostgresEventQueue {
        PostgresEventQueue::new(self.db_pool.clone(), config)
    }
}
