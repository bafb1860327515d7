//! Queue consumer binding.
//!
//! Polls the queue one message at a time and hands each message to a
//! [`MessageHandler`] on its own task. A semaphore bounds how many handlers
//! run at once; since the queue never leases two messages of the same key,
//! parallelism only ever spans different keys.
//!
//! ```text
//! QueueConsumer
//!     │
//!     ├─► dequeue(CONSUMER_BATCH_SIZE)
//!     ├─► spawn handler under timeout(CONSUMER_TIMEOUT)
//!     │       ├─► Ok  → delete(lease)
//!     │       └─► Err → log, leave lease to expire
//!     └─► sleep(poll_interval) when empty
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::QueueError;
use super::message::{EventMessage, LeasedMessage};
use super::queue::EventQueue;
use super::{CONSUMER_BATCH_SIZE, CONSUMER_TIMEOUT};

/// Why a delivery did not resolve its message. Never returned to a producer;
/// the message is retried once its lease expires.
#[derive(Debug, Error)]
pub enum ConsumerFailure {
    #[error("invalid payload: {0}")]
    Payload(String),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("handler exceeded {0:?} budget")]
    TimedOut(Duration),

    /// Work finished but the lease could not be released.
    #[error("failed to delete message: {0}")]
    Resolve(#[from] QueueError),
}

/// Work performed for one dequeued message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &EventMessage) -> Result<(), ConsumerFailure>;
}

/// Configuration for the queue consumer.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Handlers allowed to run at once.
    pub concurrency: usize,
    /// How long to wait when the queue is empty.
    pub poll_interval: Duration,
    /// Budget for a single handler invocation.
    pub timeout: Duration,
    pub worker_id: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            timeout: CONSUMER_TIMEOUT,
            worker_id: format!("consumer-{}", Uuid::new_v4()),
        }
    }
}

impl ConsumerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct QueueConsumer {
    queue: Arc<dyn EventQueue>,
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn EventQueue>, handler: Arc<dyn MessageHandler>) -> Self {
        Self::with_config(queue, handler, ConsumerConfig::default())
    }

    pub fn with_config(
        queue: Arc<dyn EventQueue>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Run the handler for one leased message and delete it on success.
    pub async fn process(&self, leased: LeasedMessage) -> Result<(), ConsumerFailure> {
        let message = &leased.message;
        let started = tokio::time::Instant::now();

        let outcome =
            match tokio::time::timeout(self.config.timeout, self.handler.handle(message)).await {
                Ok(result) => result,
                Err(_) => Err(ConsumerFailure::TimedOut(self.config.timeout)),
            };

        if let Err(e) = outcome {
            warn!(
                message_id = %message.id,
                ordering_key = %message.ordering_key,
                receive_count = message.receive_count,
                error = %e,
                "message handling failed, leaving lease to expire"
            );
            return Err(e);
        }

        if let Err(e) = self.queue.delete(&leased.lease).await {
            error!(
                message_id = %message.id,
                ordering_key = %message.ordering_key,
                error = %e,
                "handled message could not be deleted, it will be redelivered"
            );
            return Err(e.into());
        }

        debug!(
            message_id = %message.id,
            ordering_key = %message.ordering_key,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "message handled"
        );
        Ok(())
    }

    /// Dequeue and process a single batch inline. Returns the number of
    /// messages leased.
    pub async fn poll_once(&self) -> Result<usize, QueueError> {
        let batch = self.queue.dequeue(CONSUMER_BATCH_SIZE).await?;
        let count = batch.len();
        for leased in batch {
            // Failures are already logged and recovered by lease expiry.
            let _ = self.process(leased).await;
        }
        Ok(count)
    }

    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            batch_size = CONSUMER_BATCH_SIZE,
            concurrency = self.config.concurrency,
            "queue consumer starting"
        );

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "consumer task panicked");
                }
            }

            let batch = match self.queue.dequeue(CONSUMER_BATCH_SIZE).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "failed to dequeue messages");
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                drop(permit);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            let mut permit = Some(permit);
            for leased in batch {
                let permit = match permit.take() {
                    Some(permit) => permit,
                    None => match permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let consumer = self.clone();
                in_flight.spawn(async move {
                    let _permit = permit;
                    let _ = consumer.process(leased).await;
                });
            }
        }

        // In-flight handlers finish; anything unresolved is redelivered later.
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "consumer task panicked");
            }
        }

        info!(worker_id = %self.config.worker_id, "queue consumer stopped");
    }
}
