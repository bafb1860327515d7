//! Process-local queue store.
//!
//! Messages live in one FIFO per ordering key; only the head of a partition can
//! be leased. Lease expiry is evaluated lazily on every `dequeue` and explicitly
//! by `sweep_expired`. Time comes from `tokio::time::Instant`, so paused-clock
//! tests can step through visibility windows.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::QueueError;
use super::message::{
    DeadLetter, DedupToken, EnqueueResult, EventMessage, LeaseHandle, LeasedMessage, OrderingKey,
    QueueConfig, QueueStats, RedeliveryPolicy, SweepReport,
};
use super::queue::EventQueue;

struct Entry {
    seq: u64,
    message: EventMessage,
    lease: Option<ActiveLease>,
}

struct ActiveLease {
    receipt: Uuid,
    expires_at: Instant,
}

impl ActiveLease {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct DedupRecord {
    message_id: Uuid,
    recorded_at: Instant,
}

#[derive(Default)]
struct State {
    next_seq: u64,
    partitions: HashMap<OrderingKey, VecDeque<Entry>>,
    dedup: HashMap<DedupToken, DedupRecord>,
    dead_letters: Vec<DeadLetter>,
}

impl State {
    /// `Leased -> Enqueued` (or dead-lettered) for every head whose lease ran out.
    fn expire_leases(&mut self, now: Instant, policy: RedeliveryPolicy) -> (usize, usize) {
        let mut redelivered = 0;
        let mut dead_lettered = 0;
        let mut emptied = Vec::new();

        for (key, partition) in self.partitions.iter_mut() {
            let Some(head) = partition.front_mut() else {
                continue;
            };
            match &head.lease {
                Some(lease) if !lease.is_live(now) => {}
                _ => continue,
            }

            if policy.should_dead_letter(head.message.receive_count) {
                if let Some(entry) = partition.pop_front() {
                    warn!(
                        message_id = %entry.message.id,
                        ordering_key = %key,
                        receive_count = entry.message.receive_count,
                        "message exceeded max receive count, dead-lettering"
                    );
                    self.dead_letters.push(DeadLetter {
                        reason: format!(
                            "lease expired after {} receives",
                            entry.message.receive_count
                        ),
                        message: entry.message,
                        dead_lettered_at: Utc::now(),
                    });
                    dead_lettered += 1;
                }
                if partition.is_empty() {
                    emptied.push(key.clone());
                }
            } else {
                debug!(
                    message_id = %head.message.id,
                    ordering_key = %key,
                    receive_count = head.message.receive_count,
                    "lease expired, message visible again"
                );
                head.lease = None;
                redelivered += 1;
            }
        }

        for key in emptied {
            self.partitions.remove(&key);
        }

        (redelivered, dead_lettered)
    }

    fn purge_dedup(&mut self, now: Instant, window: std::time::Duration) -> usize {
        let before = self.dedup.len();
        self.dedup
            .retain(|_, record| now.duration_since(record.recorded_at) < window);
        before - self.dedup.len()
    }
}

/// In-memory [`EventQueue`]. Not durable across restarts; used when no
/// database is configured and throughout the tests.
pub struct InMemoryEventQueue {
    config: QueueConfig,
    state: Mutex<State>,
}

impl InMemoryEventQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(
        &self,
        payload: Bytes,
        ordering_key: OrderingKey,
        dedup_token: DedupToken,
    ) -> Result<EnqueueResult, QueueError> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(record) = state.dedup.get(&dedup_token) {
            if now.duration_since(record.recorded_at) < self.config.dedup_window {
                return Ok(EnqueueResult::Deduplicated(record.message_id));
            }
        }

        let id = Uuid::now_v7();
        let seq = state.next_seq;
        state.next_seq += 1;

        state.dedup.insert(
            dedup_token.clone(),
            DedupRecord {
                message_id: id,
                recorded_at: now,
            },
        );
        state
            .partitions
            .entry(ordering_key.clone())
            .or_default()
            .push_back(Entry {
                seq,
                message: EventMessage {
                    id,
                    ordering_key,
                    dedup_token,
                    payload,
                    enqueued_at: Utc::now(),
                    receive_count: 0,
                },
                lease: None,
            });

        Ok(EnqueueResult::Accepted(id))
    }

    async fn dequeue(&self, max_messages: usize) -> Result<Vec<LeasedMessage>, QueueError> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        state.expire_leases(now, self.config.redelivery);

        // Oldest visible head first across keys; later messages of a key stay hidden.
        let mut heads: Vec<(u64, OrderingKey)> = state
            .partitions
            .iter()
            .filter_map(|(key, partition)| {
                partition
                    .front()
                    .filter(|entry| entry.lease.is_none())
                    .map(|entry| (entry.seq, key.clone()))
            })
            .collect();
        heads.sort_unstable_by_key(|(seq, _)| *seq);
        heads.truncate(max_messages);

        let mut leased = Vec::with_capacity(heads.len());
        for (_, key) in heads {
            let Some(head) = state.partitions.get_mut(&key).and_then(|p| p.front_mut()) else {
                continue;
            };
            let receipt = Uuid::new_v4();
            head.lease = Some(ActiveLease {
                receipt,
                expires_at: now + self.config.visibility_timeout,
            });
            head.message.receive_count += 1;

            leased.push(LeasedMessage {
                message: head.message.clone(),
                lease: LeaseHandle {
                    message_id: head.message.id,
                    receipt,
                },
            });
        }

        Ok(leased)
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let owner = state.partitions.iter().find_map(|(key, partition)| {
            let head = partition.front()?;
            let active = head.lease.as_ref()?;
            let matches = head.message.id == lease.message_id
                && active.receipt == lease.receipt
                && active.is_live(now);
            matches.then(|| key.clone())
        });

        let Some(key) = owner else {
            return Err(QueueError::InvalidLease(lease.message_id));
        };

        let now_empty = match state.partitions.get_mut(&key) {
            Some(partition) => {
                partition.pop_front();
                partition.is_empty()
            }
            None => false,
        };
        if now_empty {
            state.partitions.remove(&key);
        }

        Ok(())
    }

    async fn sweep_expired(&self) -> Result<SweepReport, QueueError> {
        let now = Instant::now();
        let mut guard = self.state.lock().await;

        let (redelivered, dead_lettered) = guard.expire_leases(now, self.config.redelivery);
        let dedup_purged = guard.purge_dedup(now, self.config.dedup_window);

        Ok(SweepReport {
            redelivered,
            dead_lettered,
            dedup_purged,
        })
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = Instant::now();
        let guard = self.state.lock().await;

        let mut stats = QueueStats {
            dead_lettered: guard.dead_letters.len() as u64,
            ..QueueStats::default()
        };
        for partition in guard.partitions.values() {
            for entry in partition {
                match &entry.lease {
                    Some(lease) if lease.is_live(now) => stats.leased += 1,
                    _ => stats.pending += 1,
                }
            }
        }

        Ok(stats)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.state.lock().await.dead_letters.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::event_queue::VISIBILITY_TIMEOUT;
    use std::time::Duration;

    fn key(k: &str) -> OrderingKey {
        OrderingKey::new(k).unwrap()
    }

    fn token(t: &str) -> DedupToken {
        DedupToken::new(t).unwrap()
    }

    async fn push(queue: &InMemoryEventQueue, k: &str, t: &str) -> Uuid {
        queue
            .enqueue(Bytes::from(format!("payload-{t}")), key(k), token(t))
            .await
            .unwrap()
            .message_id()
    }

    #[tokio::test(start_paused = true)]
    async fn delete_resolves_message() {
        let queue = InMemoryEventQueue::default();
        let id = push(&queue, "chan-1", "m1").await;

        let leased = queue.dequeue(1).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].message.id, id);

        queue.delete(&leased[0].lease).await.unwrap();
        assert!(queue.dequeue(1).await.unwrap().is_empty());

        // Even after the window nothing comes back.
        tokio::time::advance(VISIBILITY_TIMEOUT + Duration::from_secs(1)).await;
        assert!(queue.dequeue(1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lease_redelivers_identical_payload() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "m1").await;

        let first = queue.dequeue(1).await.unwrap().remove(0);
        assert!(queue.dequeue(1).await.unwrap().is_empty());

        tokio::time::advance(VISIBILITY_TIMEOUT - Duration::from_millis(1)).await;
        assert!(queue.dequeue(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(1)).await;
        let second = queue.dequeue(1).await.unwrap().remove(0);

        assert_eq!(second.message.id, first.message.id);
        assert_eq!(second.message.payload, first.message.payload);
        assert_eq!(second.message.receive_count, 2);
        assert_ne!(second.lease.receipt, first.lease.receipt);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_lease_cannot_delete() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "m1").await;

        let first = queue.dequeue(1).await.unwrap().remove(0);
        tokio::time::advance(VISIBILITY_TIMEOUT).await;

        let err = queue.delete(&first.lease).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidLease(id) if id == first.message.id));

        let second = queue.dequeue(1).await.unwrap().remove(0);
        assert!(queue.delete(&first.lease).await.is_err());
        queue.delete(&second.lease).await.unwrap();
    }

    #[tokio::test]
    async fn delete_twice_is_invalid() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "m1").await;

        let leased = queue.dequeue(1).await.unwrap().remove(0);
        queue.delete(&leased.lease).await.unwrap();
        assert!(matches!(
            queue.delete(&leased.lease).await,
            Err(QueueError::InvalidLease(_))
        ));
    }

    #[tokio::test]
    async fn same_key_is_strictly_fifo() {
        let queue = InMemoryEventQueue::default();
        let first = push(&queue, "chan-1", "m1").await;
        let second = push(&queue, "chan-1", "m2").await;

        let leased = queue.dequeue(10).await.unwrap();
        assert_eq!(leased.len(), 1, "only the head of a key is visible");
        assert_eq!(leased[0].message.id, first);

        assert!(queue.dequeue(10).await.unwrap().is_empty());

        queue.delete(&leased[0].lease).await.unwrap();
        let next = queue.dequeue(10).await.unwrap();
        assert_eq!(next[0].message.id, second);
    }

    #[tokio::test(start_paused = true)]
    async fn redelivered_head_keeps_blocking_its_key() {
        let queue = InMemoryEventQueue::default();
        let first = push(&queue, "chan-1", "m1").await;
        push(&queue, "chan-1", "m2").await;

        queue.dequeue(1).await.unwrap();
        tokio::time::advance(VISIBILITY_TIMEOUT).await;

        let again = queue.dequeue(5).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message.id, first);
    }

    #[tokio::test]
    async fn different_keys_are_served_concurrently() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "a1").await;
        push(&queue, "chan-1", "a2").await;
        push(&queue, "chan-2", "b1").await;

        let leased = queue.dequeue(10).await.unwrap();
        let keys: Vec<_> = leased
            .iter()
            .map(|l| l.message.ordering_key.as_str().to_string())
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"chan-1".to_string()));
        assert!(keys.contains(&"chan-2".to_string()));
    }

    #[tokio::test]
    async fn batch_size_one_returns_single_message() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "a1").await;
        push(&queue, "chan-2", "b1").await;

        assert_eq!(queue.dequeue(1).await.unwrap().len(), 1);
        assert_eq!(queue.dequeue(1).await.unwrap().len(), 1);
        assert!(queue.dequeue(1).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_within_window_yields_one_message() {
        let queue = InMemoryEventQueue::default();

        let first = queue
            .enqueue(Bytes::from_static(b"x"), key("chan-1"), token("Ev1"))
            .await
            .unwrap();
        let second = queue
            .enqueue(Bytes::from_static(b"x"), key("chan-1"), token("Ev1"))
            .await
            .unwrap();

        assert!(first.is_accepted());
        assert_eq!(second, EnqueueResult::Deduplicated(first.message_id()));

        let leased = queue.dequeue(10).await.unwrap();
        assert_eq!(leased.len(), 1);
        queue.delete(&leased[0].lease).await.unwrap();
        assert!(queue.dequeue(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_token_reusable_after_window() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "Ev1").await;

        tokio::time::advance(queue.config().dedup_window).await;
        let again = queue
            .enqueue(Bytes::from_static(b"y"), key("chan-1"), token("Ev1"))
            .await
            .unwrap();
        assert!(again.is_accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn dead_letter_policy_unblocks_key() {
        let queue = InMemoryEventQueue::new(
            QueueConfig::builder()
                .redelivery(RedeliveryPolicy::DeadLetterAfter(2))
                .build(),
        );
        let poison = push(&queue, "chan-1", "m1").await;
        let next = push(&queue, "chan-1", "m2").await;

        for _ in 0..2 {
            let leased = queue.dequeue(1).await.unwrap();
            assert_eq!(leased[0].message.id, poison);
            tokio::time::advance(VISIBILITY_TIMEOUT).await;
        }

        let leased = queue.dequeue(1).await.unwrap();
        assert_eq!(leased[0].message.id, next);

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.id, poison);
        assert_eq!(dead[0].message.receive_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reports_expiry_and_purges_tokens() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "m1").await;
        push(&queue, "chan-2", "m2").await;
        queue.dequeue(1).await.unwrap();

        tokio::time::advance(VISIBILITY_TIMEOUT).await;
        let report = queue.sweep_expired().await.unwrap();

        assert_eq!(report.redelivered, 1);
        assert_eq!(report.dead_lettered, 0);
        assert_eq!(report.dedup_purged, 2);

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.leased, 0);
    }

    #[tokio::test]
    async fn stats_count_leased_and_blocked_messages() {
        let queue = InMemoryEventQueue::default();
        push(&queue, "chan-1", "a1").await;
        push(&queue, "chan-1", "a2").await;
        queue.dequeue(1).await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.dead_lettered, 0);
    }
}
