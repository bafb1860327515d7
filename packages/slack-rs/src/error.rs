//! Error types for the Slack client.

use thiserror::Error;

/// Slack client errors.
#[derive(Debug, Error)]
pub enum SlackError {
    /// Configuration error (unusable token or signing secret)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// Slack answered with `ok: false` or a non-2xx status
    #[error("API error: {0}")]
    Api(String),

    /// Unexpected response body
    #[error("Parse error: {0}")]
    Parse(String),
}
