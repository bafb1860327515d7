//! Relay server
//!
//! Runs the webhook ingress, the queue consumer, the lease sweeper and the
//! knowledge base sync scheduler in one process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_core::domains::knowledge_base::KnowledgeBaseSync;
use relay_core::domains::slack_events::MentionResponder;
use relay_core::kernel::event_queue::{
    ConsumerConfig, EventQueue, InMemoryEventQueue, LeaseSweeper, PostgresEventQueue,
    QueueConsumer,
};
use relay_core::kernel::{start_scheduler, ServerDeps, SyncTrigger, SYNC_SCHEDULE};
use relay_core::server::build_app;
use relay_core::Config;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Slack knowledge base relay");

    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);
    tracing::info!(config = ?config, "Configuration loaded");

    // Queue setup
    let queue: Arc<dyn EventQueue> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let queue = PostgresEventQueue::connect(database_url, config.queue_config())
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Running database migrations...");
            queue.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Migrations complete");
            Arc::new(queue)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory queue (not durable)");
            Arc::new(InMemoryEventQueue::new(config.queue_config()))
        }
    };

    let deps = ServerDeps::from_config(config.clone(), queue.clone())?;
    let shutdown = CancellationToken::new();

    // Consumer + lease sweeper
    let responder = Arc::new(MentionResponder::new(
        deps.knowledge_base.clone(),
        deps.chat.clone(),
    ));
    let consumer = Arc::new(QueueConsumer::with_config(
        queue.clone(),
        responder,
        ConsumerConfig {
            concurrency: config.consumer_concurrency,
            ..ConsumerConfig::with_worker_id(format!("consumer-{}", std::process::id()))
        },
    ));
    let consumer_handle = consumer.spawn(shutdown.clone());
    let sweeper_handle = LeaseSweeper::new(queue.clone(), SWEEP_INTERVAL).spawn(shutdown.clone());

    // Scheduled knowledge base sync
    let mut scheduler = if config.sync_enabled {
        let trigger = Arc::new(SyncTrigger::new(Arc::new(KnowledgeBaseSync::new(
            deps.knowledge_base.clone(),
        ))));
        Some(
            start_scheduler(trigger, SYNC_SCHEDULE)
                .await
                .context("Failed to start scheduler")?,
        )
    } else {
        tracing::info!("Knowledge base sync disabled");
        None
    };

    // Start server
    let app = build_app(deps);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Slack events: http://localhost:{}/slack/events", config.port);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    if let Some(scheduler) = scheduler.as_mut() {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler shutdown failed");
        }
    }
    let _ = consumer_handle.await;
    let _ = sweeper_handle.await;

    tracing::info!("Shutdown complete");
    Ok(())
}
