use anyhow::{Context, Result};
use dotenvy::dotenv;
use kb_client::KnowledgeBaseClient;
use slack::SlackOptions;
use std::env;

use crate::kernel::event_queue::{QueueConfig, RedeliveryPolicy};

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    pub slack_signing_secret: String,
    pub bot_oauth_token: String,
    /// Model used for retrieve-and-generate (ID or ARN).
    pub chat_model_id: String,
    pub knowledge_base_id: String,
    pub kb_api_key: String,
    pub kb_region: String,
    pub kb_runtime_url: Option<String>,
    pub kb_agent_url: Option<String>,
    /// In-memory queue when unset.
    pub database_url: Option<String>,
    pub port: u16,
    pub consumer_concurrency: usize,
    pub max_receive_count: Option<u32>,
    pub sync_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` is this over the process environment.
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            var(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };

        Ok(Self {
            slack_signing_secret: required("SLACK_SIGNING_SECRET")?,
            bot_oauth_token: required("BOT_OAUTH_TOKEN")?,
            chat_model_id: required("CHAT_MODEL_ID")?,
            knowledge_base_id: required("KNOWLEDGE_BASE_ID")?,
            kb_api_key: required("KB_API_KEY")?,
            kb_region: var("KB_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            kb_runtime_url: var("KB_RUNTIME_URL"),
            kb_agent_url: var("KB_AGENT_URL"),
            database_url: var("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            port: var("SERVER_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("SERVER_PORT must be a valid number")?,
            consumer_concurrency: var("CONSUMER_CONCURRENCY")
                .unwrap_or_else(|| "4".to_string())
                .parse()
                .context("CONSUMER_CONCURRENCY must be a valid number")?,
            max_receive_count: max_receive_count(&var)?,
            sync_enabled: var("SYNC_ENABLED")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
        })
    }

    pub fn slack_options(&self) -> SlackOptions {
        SlackOptions {
            bot_token: self.bot_oauth_token.clone(),
            signing_secret: self.slack_signing_secret.clone(),
        }
    }

    pub fn knowledge_base_client(&self) -> KnowledgeBaseClient {
        let api_key = self.kb_api_key.clone();
        match (&self.kb_runtime_url, &self.kb_agent_url) {
            (Some(runtime), Some(agent)) => KnowledgeBaseClient::new(api_key, runtime, agent),
            _ => KnowledgeBaseClient::for_region(&self.kb_region, api_key),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::builder()
            .redelivery(RedeliveryPolicy::from_max_receive_count(
                self.max_receive_count,
            ))
            .build()
    }
}

fn max_receive_count<F>(var: &F) -> Result<Option<u32>>
where
    F: Fn(&str) -> Option<String>,
{
    var("MAX_RECEIVE_COUNT")
        .map(|v| v.parse())
        .transpose()
        .context("MAX_RECEIVE_COUNT must be a valid number")
}

/// Queue store settings only. Operator commands that never talk to Slack or
/// the knowledge base load this instead of [`Config`].
#[derive(Clone)]
pub struct QueueStoreConfig {
    pub database_url: String,
    pub max_receive_count: Option<u32>,
}

impl QueueStoreConfig {
    pub fn from_env() -> Result<Self> {
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            database_url: var("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .context("DATABASE_URL must be set")?,
            max_receive_count: max_receive_count(&var)?,
        })
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig::builder()
            .redelivery(RedeliveryPolicy::from_max_receive_count(
                self.max_receive_count,
            ))
            .build()
    }
}

impl std::fmt::Debug for QueueStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStoreConfig")
            .field("database_url", &"***")
            .field("max_receive_count", &self.max_receive_count)
            .finish()
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("slack_signing_secret", &"***")
            .field("bot_oauth_token", &"***")
            .field("chat_model_id", &self.chat_model_id)
            .field("knowledge_base_id", &self.knowledge_base_id)
            .field("kb_api_key", &"***")
            .field("kb_region", &self.kb_region)
            .field("kb_runtime_url", &self.kb_runtime_url)
            .field("kb_agent_url", &self.kb_agent_url)
            .field("database_url", &self.database_url.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .field("consumer_concurrency", &self.consumer_concurrency)
            .field("max_receive_count", &self.max_receive_count)
            .field("sync_enabled", &self.sync_enabled)
            .finish()
    }
}
