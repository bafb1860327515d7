//! Durable ordered event queue.
//!
//! Decouples webhook acknowledgement from slow downstream work. Messages are
//! partitioned by ordering key; within a key delivery is strictly FIFO and at
//! most one message is in flight.
//!
//! # Lifecycle
//!
//! ```text
//! enqueue ──► Enqueued ──dequeue──► Leased ──delete──► Resolved
//!                ▲                    │
//!                └── lease expired ───┤
//!                                     └── receive limit hit ──► DeadLettered
//! ```
//!
//! A consumer that fails simply does not delete; the message reappears once
//! its visibility timeout elapses and blocks its key until then.

mod error;
mod memory;
mod message;
mod postgres;
mod queue;
mod sweeper;

pub mod consumer;

use std::time::Duration;

pub use consumer::{ConsumerConfig, ConsumerFailure, MessageHandler, QueueConsumer};
pub use error::QueueError;
pub use memory::InMemoryEventQueue;
pub use message::{
    DeadLetter, DedupToken, EnqueueResult, EventMessage, LeaseHandle, LeasedMessage, OrderingKey,
    QueueConfig, QueueStats, RedeliveryPolicy, SweepReport,
};
pub use postgres::PostgresEventQueue;
pub use queue::EventQueue;
pub use sweeper::LeaseSweeper;

/// How long a dequeued message stays invisible before it is redelivered.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Window in which a repeated dedup token is dropped at enqueue.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Messages requested per consumer poll.
pub const CONSUMER_BATCH_SIZE: usize = 1;

/// Wall-clock budget for handling a single message.
pub const CONSUMER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
