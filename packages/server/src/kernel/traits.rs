// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// Business logic (answering a mention, syncing data sources) lives in the
// slack_events domain and only talks to these traits.
//
// Naming convention: Base* for trait names (e.g., BaseKnowledgeBase, BaseChatPoster)

use anyhow::Result;
use async_trait::async_trait;
use kb_client::{DataSourceSummary, RetrievalResult};

// =============================================================================
// Knowledge Base Trait (Infrastructure - retrieve-and-generate + ingestion)
// =============================================================================

#[async_trait]
pub trait BaseKnowledgeBase: Send + Sync {
    /// Answer `query` from the configured knowledge base with the configured model.
    async fn retrieve_and_generate(&self, query: &str) -> Result<RetrievalResult>;

    /// Every data source attached to the knowledge base.
    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>>;

    /// Start an ingestion job for one data source, returning the job ID.
    async fn start_ingestion_job(&self, data_source_id: &str) -> Result<String>;
}

// =============================================================================
// Chat Poster Trait (Infrastructure - Slack Web API)
// =============================================================================

#[async_trait]
pub trait BaseChatPoster: Send + Sync {
    /// Post `text` as a reply in the thread rooted at `thread_ts`.
    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()>;
}

// =============================================================================
// Signature Verifier Trait (Infrastructure - request authenticity)
// =============================================================================

/// Authenticity check that runs before an inbound body is parsed.
pub trait BaseSignatureVerifier: Send + Sync {
    /// `timestamp` and `signature` are the raw header values.
    fn verify(&self, timestamp: &str, signature: &str, body: &[u8]) -> bool;
}

// =============================================================================
// Sync Handler Trait (scheduled knowledge base synchronization)
// =============================================================================

#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Run one synchronization pass. Takes no input; the firing itself is the trigger.
    async fn sync(&self) -> Result<()>;
}
