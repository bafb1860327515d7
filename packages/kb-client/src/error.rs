//! Error types for the knowledge base client.

use thiserror::Error;

/// Result type for knowledge base client operations.
pub type Result<T> = std::result::Result<T, KbError>;

/// Knowledge base client errors.
#[derive(Debug, Error)]
pub enum KbError {
    /// Configuration error (missing identifiers, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("Network error: {0}")]
    Network(String),

    /// API error (non-2xx response, throttling, access denied)
    #[error("API error: {0}")]
    Api(String),

    /// Parse error (invalid JSON, missing output)
    #[error("Parse error: {0}")]
    Parse(String),
}
