//! Operator CLI for the event queue and the knowledge base sync.
//!
//! Every command prints one JSON object to stdout.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::config::{Config, QueueStoreConfig};
use relay_core::domains::knowledge_base::actions::sync_data_sources;
use relay_core::kernel::event_queue::{EventQueue, PostgresEventQueue};
use relay_core::kernel::KnowledgeBaseAdapter;
use serde::Serialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "relay_cli")]
#[command(about = "Event queue and knowledge base operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply queue schema migrations
    Migrate,

    /// Print pending / leased / dead-lettered counts
    Stats,

    /// List dead-lettered messages
    DeadLetters {
        /// Include the raw payload of each message
        #[arg(long)]
        payloads: bool,
    },

    /// Run one knowledge base sync pass now
    SyncNow,
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string(value).context("Failed to serialize output")?
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Migrate => cmd_migrate().await,
        Commands::Stats => cmd_stats().await,
        Commands::DeadLetters { payloads } => cmd_dead_letters(payloads).await,
        Commands::SyncNow => {
            let config = Config::from_env().context("Failed to load configuration")?;
            cmd_sync_now(&config).await
        }
    }
}

/// Queue commands need only the database, never the bot's credentials.
async fn get_queue() -> Result<PostgresEventQueue> {
    let config = QueueStoreConfig::from_env().context("Failed to load queue configuration")?;
    PostgresEventQueue::connect(&config.database_url, config.queue_config())
        .await
        .context("Failed to connect to database")
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_migrate() -> Result<()> {
    let queue = get_queue().await?;
    queue.migrate().await.context("Failed to run migrations")?;
    output(&json!({ "success": true, "message": "migrations applied" }))
}

async fn cmd_stats() -> Result<()> {
    let queue = get_queue().await?;
    let stats = queue.stats().await.context("Failed to read queue stats")?;
    output(&json!({ "success": true, "stats": stats }))
}

async fn cmd_dead_letters(payloads: bool) -> Result<()> {
    let queue = get_queue().await?;
    let dead_letters = queue
        .dead_letters()
        .await
        .context("Failed to list dead letters")?;

    let items = dead_letters
        .iter()
        .map(|dead| {
            let mut item = json!({
                "id": dead.message.id,
                "ordering_key": dead.message.ordering_key,
                "dedup_token": dead.message.dedup_token,
                "receive_count": dead.message.receive_count,
                "enqueued_at": dead.message.enqueued_at,
                "dead_lettered_at": dead.dead_lettered_at,
                "reason": dead.reason,
            });
            if payloads {
                item["payload"] = json!(String::from_utf8_lossy(&dead.message.payload));
            }
            item
        })
        .collect::<Vec<_>>();

    output(&json!({ "success": true, "count": items.len(), "dead_letters": items }))
}

async fn cmd_sync_now(config: &Config) -> Result<()> {
    let knowledge_base = KnowledgeBaseAdapter::new(
        Arc::new(config.knowledge_base_client()),
        config.knowledge_base_id.clone(),
        config.chat_model_id.clone(),
    );

    let report = sync_data_sources(&knowledge_base).await?;
    output(&json!({
        "success": report.failed.is_empty(),
        "started": report
            .started
            .iter()
            .map(|(ds, job)| json!({ "data_source_id": ds, "ingestion_job_id": job }))
            .collect::<Vec<_>>(),
        "failed": report.failed,
    }))
}
