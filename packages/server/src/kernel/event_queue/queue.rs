//! Queue contract shared by the in-memory and PostgreSQL stores.

use async_trait::async_trait;
use bytes::Bytes;

use super::error::QueueError;
use super::message::{
    DeadLetter, DedupToken, EnqueueResult, LeaseHandle, LeasedMessage, OrderingKey, QueueStats,
    SweepReport,
};

/// Durable ordered queue.
///
/// Every operation is atomic per message; callers never need their own locking
/// because a lease already serializes access to the message it covers.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Store a message unless `dedup_token` was enqueued within the dedup window,
    /// in which case nothing is stored and the original message ID is returned.
    async fn enqueue(
        &self,
        payload: Bytes,
        ordering_key: OrderingKey,
        dedup_token: DedupToken,
    ) -> Result<EnqueueResult, QueueError>;

    /// Lease up to `max_messages` visible messages.
    ///
    /// Only the oldest unresolved message of each ordering key is ever eligible,
    /// so at most one message per key is returned and a key with a leased head
    /// contributes nothing until that head is deleted or redelivered.
    async fn dequeue(&self, max_messages: usize) -> Result<Vec<LeasedMessage>, QueueError>;

    /// Permanently remove a leased message.
    ///
    /// Fails with [`QueueError::InvalidLease`] once the lease has expired.
    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError>;

    /// Return expired leases to the queue (or the dead-letter store) and purge
    /// dedup tokens older than the window.
    async fn sweep_expired(&self) -> Result<SweepReport, QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;
}
