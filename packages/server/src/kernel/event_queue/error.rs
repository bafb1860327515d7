use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueError {
    /// Lease expired, was already used, or never existed.
    #[error("invalid lease for message {0}")]
    InvalidLease(Uuid),

    /// Store unreachable (connection refused, pool exhausted). Safe to retry.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("queue storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => QueueError::Unavailable(error.to_string()),
            other => QueueError::Storage(other.to_string()),
        }
    }
}
