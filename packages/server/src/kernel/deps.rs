//! Server dependencies for handlers (using traits for testability)
//!
//! This module provides the dependency container shared by the ingress,
//! consumer and sync handlers. All external services use trait abstractions
//! so tests can swap in the mocks from `test_dependencies`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use kb_client::{DataSourceSummary, KnowledgeBaseClient, RetrievalResult};
use slack::SlackService;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::kernel::event_queue::EventQueue;
use crate::kernel::{BaseChatPoster, BaseKnowledgeBase, BaseSignatureVerifier};

// =============================================================================
// SlackService Adapters (implement BaseChatPoster / BaseSignatureVerifier)
// =============================================================================

/// Wrapper around SlackService that implements BaseChatPoster
pub struct SlackChatAdapter(pub Arc<SlackService>);

impl SlackChatAdapter {
    pub fn new(service: Arc<SlackService>) -> Self {
        Self(service)
    }
}

#[async_trait]
impl BaseChatPoster for SlackChatAdapter {
    async fn post_thread_reply(&self, channel: &str, thread_ts: &str, text: &str) -> Result<()> {
        self.0
            .post_thread_reply(channel, thread_ts, text)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

/// Wrapper around SlackService that implements BaseSignatureVerifier
pub struct SlackSignatureAdapter(pub Arc<SlackService>);

impl SlackSignatureAdapter {
    pub fn new(service: Arc<SlackService>) -> Self {
        Self(service)
    }
}

impl BaseSignatureVerifier for SlackSignatureAdapter {
    fn verify(&self, timestamp: &str, signature: &str, body: &[u8]) -> bool {
        let Ok(timestamp) = timestamp.trim().parse::<i64>() else {
            return false;
        };
        match self.0.verify_request(timestamp, body, signature) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(error = %e, "signature verification failed");
                false
            }
        }
    }
}

// =============================================================================
// KnowledgeBaseClient Adapter (implements BaseKnowledgeBase)
// =============================================================================

/// Binds a KnowledgeBaseClient to one knowledge base and one model.
pub struct KnowledgeBaseAdapter {
    client: Arc<KnowledgeBaseClient>,
    knowledge_base_id: String,
    model_id: String,
}

impl KnowledgeBaseAdapter {
    pub fn new(
        client: Arc<KnowledgeBaseClient>,
        knowledge_base_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            knowledge_base_id: knowledge_base_id.into(),
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl BaseKnowledgeBase for KnowledgeBaseAdapter {
    async fn retrieve_and_generate(&self, query: &str) -> Result<RetrievalResult> {
        self.client
            .retrieve_and_generate(&self.knowledge_base_id, &self.model_id, query)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn list_data_sources(&self) -> Result<Vec<DataSourceSummary>> {
        self.client
            .list_data_sources(&self.knowledge_base_id)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn start_ingestion_job(&self, data_source_id: &str) -> Result<String> {
        self.client
            .start_ingestion_job(&self.knowledge_base_id, data_source_id)
            .await
            .map(|job| job.ingestion_job_id)
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Server dependencies accessible to handlers (using traits for testability)
#[derive(Clone)]
pub struct ServerDeps {
    pub config: Arc<Config>,
    pub queue: Arc<dyn EventQueue>,
    pub signature_verifier: Arc<dyn BaseSignatureVerifier>,
    pub chat: Arc<dyn BaseChatPoster>,
    pub knowledge_base: Arc<dyn BaseKnowledgeBase>,
}

impl ServerDeps {
    pub fn new(
        config: Arc<Config>,
        queue: Arc<dyn EventQueue>,
        signature_verifier: Arc<dyn BaseSignatureVerifier>,
        chat: Arc<dyn BaseChatPoster>,
        knowledge_base: Arc<dyn BaseKnowledgeBase>,
    ) -> Self {
        Self {
            config,
            queue,
            signature_verifier,
            chat,
            knowledge_base,
        }
    }

    /// Wire the production Slack and knowledge base clients around `queue`.
    pub fn from_config(config: Arc<Config>, queue: Arc<dyn EventQueue>) -> Result<Self> {
        let slack = Arc::new(
            SlackService::new(config.slack_options())
                .context("Failed to create Slack client")?,
        );
        let kb_client = Arc::new(config.knowledge_base_client());

        Ok(Self::new(
            config.clone(),
            queue,
            Arc::new(SlackSignatureAdapter::new(slack.clone())),
            Arc::new(SlackChatAdapter::new(slack)),
            Arc::new(KnowledgeBaseAdapter::new(
                kb_client,
                config.knowledge_base_id.clone(),
                config.chat_model_id.clone(),
            )),
        ))
    }
}
