//! Queue message model.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use super::{DEDUP_WINDOW, VISIBILITY_TIMEOUT};

// ============================================================================
// Keys
// ============================================================================

/// Partition key for FIFO delivery. Messages sharing a key are handed out one
/// at a time, in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderingKey(String);

impl OrderingKey {
    /// Returns `None` for blank keys.
    pub fn new(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-derived identifier used to drop repeated enqueues inside the dedup window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupToken(String);

impl DedupToken {
    /// Returns `None` for blank tokens.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            None
        } else {
            Some(Self(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Messages and leases
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub id: Uuid,
    pub ordering_key: OrderingKey,
    pub dedup_token: DedupToken,
    /// Original inbound body, untouched.
    pub payload: Bytes,
    pub enqueued_at: DateTime<Utc>,
    /// Number of times this message has been handed to a consumer (including the current one).
    pub receive_count: u32,
}

/// Proof of an active visibility lease. Every dequeue mints a new receipt, so a
/// handle from an expired lease never matches a redelivered copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeaseHandle {
    pub message_id: Uuid,
    pub receipt: Uuid,
}

#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub message: EventMessage,
    pub lease: LeaseHandle,
}

/// Result type for enqueue operations that handles dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Message stored, returns the new message ID
    Accepted(Uuid),
    /// Token seen inside the dedup window, returns the original message ID
    Deduplicated(Uuid),
}

impl EnqueueResult {
    pub fn message_id(&self) -> Uuid {
        match self {
            EnqueueResult::Accepted(id) | EnqueueResult::Deduplicated(id) => *id,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueResult::Accepted(_))
    }
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: EventMessage,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Waiting for a consumer, including messages blocked behind a leased head.
    pub pending: u64,
    pub leased: u64,
    pub dead_lettered: u64,
}

/// Outcome of one lease-expiry pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub redelivered: usize,
    pub dead_lettered: usize,
    pub dedup_purged: usize,
}

// ============================================================================
// Policy
// ============================================================================

/// What happens to a message whose lease expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedeliveryPolicy {
    /// Redeliver forever; a poison message blocks its key until an operator steps in.
    #[default]
    Unbounded,
    /// Move to the dead-letter store once it has been received this many times
    /// without being deleted.
    DeadLetterAfter(u32),
}

impl RedeliveryPolicy {
    pub fn from_max_receive_count(max: Option<u32>) -> Self {
        match max {
            Some(max) if max > 0 => RedeliveryPolicy::DeadLetterAfter(max),
            _ => RedeliveryPolicy::Unbounded,
        }
    }

    pub fn should_dead_letter(&self, receive_count: u32) -> bool {
        match self {
            RedeliveryPolicy::Unbounded => false,
            RedeliveryPolicy::DeadLetterAfter(max) => receive_count >= *max,
        }
    }

    pub fn max_receive_count(&self) -> Option<u32> {
        match self {
            RedeliveryPolicy::Unbounded => None,
            RedeliveryPolicy::DeadLetterAfter(max) => Some(*max),
        }
    }
}

#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct QueueConfig {
    #[builder(default = VISIBILITY_TIMEOUT)]
    pub visibility_timeout: Duration,
    #[builder(default = DEDUP_WINDOW)]
    pub dedup_window: Duration,
    #[builder(default)]
    pub redelivery: RedeliveryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
