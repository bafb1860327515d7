//! PostgreSQL-backed event queue.
//!
//! Survives restarts and lets several server processes share one queue.
//! Per-key ordering comes from claiming only the lowest `seq` unresolved row of
//! each ordering key; concurrent consumers are kept apart with
//! `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::QueueError;
use super::message::{
    DeadLetter, DedupToken, EnqueueResult, EventMessage, LeaseHandle, LeasedMessage, OrderingKey,
    QueueConfig, QueueStats, SweepReport,
};
use super::queue::EventQueue;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    ordering_key: String,
    dedup_token: String,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    receive_count: i32,
}

impl TryFrom<MessageRow> for EventMessage {
    type Error = QueueError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let ordering_key = OrderingKey::new(row.ordering_key)
            .ok_or_else(|| QueueError::Storage(format!("message {} has blank ordering key", row.id)))?;
        let dedup_token = DedupToken::new(row.dedup_token)
            .ok_or_else(|| QueueError::Storage(format!("message {} has blank dedup token", row.id)))?;

        Ok(EventMessage {
            id: row.id,
            ordering_key,
            dedup_token,
            payload: Bytes::from(row.payload),
            enqueued_at: row.enqueued_at,
            receive_count: row.receive_count.max(0) as u32,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LeasedRow {
    #[sqlx(flatten)]
    message: MessageRow,
    lease_receipt: Uuid,
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    #[sqlx(flatten)]
    message: MessageRow,
    dead_letter_reason: Option<String>,
    dead_lettered_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    pending: i64,
    leased: i64,
    dead_lettered: i64,
}

/// PostgreSQL-backed [`EventQueue`].
pub struct PostgresEventQueue {
    pool: PgPool,
    config: QueueConfig,
}

impl PostgresEventQueue {
    pub fn new(pool: PgPool, config: QueueConfig) -> Self {
        Self { pool, config }
    }

    /// Connect a small pool to `database_url`.
    pub async fn connect(database_url: &str, config: QueueConfig) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the queue schema migrations.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::Storage(format!("migration failed: {}", e)))
    }

    fn visibility_ms(&self) -> String {
        self.config.visibility_timeout.as_millis().to_string()
    }

    fn dedup_window_ms(&self) -> String {
        self.config.dedup_window.as_millis().to_string()
    }

    /// Release every expired lease, dead-lettering the ones that hit the
    /// receive limit. Returns `(redelivered, dead_lettered)`.
    async fn expire_leases(&self) -> Result<(usize, usize), QueueError> {
        let max_receive_count = self
            .config
            .redelivery
            .max_receive_count()
            .map(|max| max.min(i32::MAX as u32) as i32);

        let dead_lettered = sqlx::query(
            r#"
            UPDATE event_messages
            SET status = 'dead_letter',
                dead_lettered_at = NOW(),
                dead_letter_reason = 'lease expired after ' || receive_count || ' receives',
                lease_receipt = NULL,
                lease_expires_at = NULL
            WHERE status = 'leased'
              AND lease_expires_at <= NOW()
              AND $1::INT IS NOT NULL
              AND receive_count >= $1::INT
            "#,
        )
        .bind(max_receive_count)
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        if dead_lettered > 0 {
            warn!(count = dead_lettered, "dead-lettered messages over receive limit");
        }

        let redelivered = sqlx::query(
            r#"
            UPDATE event_messages
            SET status = 'pending',
                lease_receipt = NULL,
                lease_expires_at = NULL
            WHERE status = 'leased'
              AND lease_expires_at <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        if redelivered > 0 {
            debug!(count = redelivered, "expired leases returned to queue");
        }

        Ok((redelivered, dead_lettered))
    }
}

#[async_trait]
impl EventQueue for PostgresEventQueue {
    async fn enqueue(
        &self,
        payload: Bytes,
        ordering_key: OrderingKey,
        dedup_token: DedupToken,
    ) -> Result<EnqueueResult, QueueError> {
        let mut tx = self.pool.begin().await?;

        // A token older than the window no longer blocks anything.
        sqlx::query(
            r#"
            DELETE FROM event_dedup_tokens
            WHERE dedup_token = $1
              AND recorded_at <= NOW() - ($2 || ' milliseconds')::INTERVAL
            "#,
        )
        .bind(dedup_token.as_str())
        .bind(self.dedup_window_ms())
        .execute(&mut *tx)
        .await?;

        let id = Uuid::now_v7();
        let claimed: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO event_dedup_tokens (dedup_token, message_id, recorded_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (dedup_token) DO NOTHING
            RETURNING message_id
            "#,
        )
        .bind(dedup_token.as_str())
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            let original: Uuid = sqlx::query_scalar(
                "SELECT message_id FROM event_dedup_tokens WHERE dedup_token = $1",
            )
            .bind(dedup_token.as_str())
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(EnqueueResult::Deduplicated(original));
        }

        sqlx::query(
            r#"
            INSERT INTO event_messages (id, ordering_key, dedup_token, payload, status, receive_count, enqueued_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, NOW())
            "#,
        )
        .bind(id)
        .bind(ordering_key.as_str())
        .bind(dedup_token.as_str())
        .bind(payload.as_ref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(EnqueueResult::Accepted(id))
    }

    async fn dequeue(&self, max_messages: usize) -> Result<Vec<LeasedMessage>, QueueError> {
        if max_messages == 0 {
            return Ok(Vec::new());
        }

        self.expire_leases().await?;

        // Heads are the oldest unresolved row per key. A key whose head is
        // leased contributes nothing.
        let rows = sqlx::query_as::<_, LeasedRow>(
            r#"
            WITH heads AS (
                SELECT DISTINCT ON (ordering_key) id, status
                FROM event_messages
                WHERE status IN ('pending', 'leased')
                ORDER BY ordering_key, seq
            ),
            candidates AS (
                SELECT m.id
                FROM event_messages m
                JOIN heads h ON h.id = m.id
                WHERE h.status = 'pending'
                  AND m.status = 'pending'
                ORDER BY m.seq
                LIMIT $1
                FOR UPDATE OF m SKIP LOCKED
            )
            UPDATE event_messages m
            SET status = 'leased',
                receive_count = m.receive_count + 1,
                lease_receipt = gen_random_uuid(),
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL
            FROM candidates c
            WHERE m.id = c.id
              AND m.status = 'pending'
            RETURNING m.id, m.ordering_key, m.dedup_token, m.payload, m.enqueued_at,
                      m.receive_count, m.lease_receipt
            "#,
        )
        .bind(max_messages.min(i64::MAX as usize) as i64)
        .bind(self.visibility_ms())
        .fetch_all(&self.pool)
        .await?;

        let mut leased = rows
            .into_iter()
            .map(|row| {
                let receipt = row.lease_receipt;
                let message = EventMessage::try_from(row.message)?;
                Ok(LeasedMessage {
                    lease: LeaseHandle {
                        message_id: message.id,
                        receipt,
                    },
                    message,
                })
            })
            .collect::<Result<Vec<_>, QueueError>>()?;

        // RETURNING order is unspecified.
        leased.sort_by_key(|l| (l.message.enqueued_at, l.message.id));
        Ok(leased)
    }

    async fn delete(&self, lease: &LeaseHandle) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_messages
            WHERE id = $1
              AND lease_receipt = $2
              AND status = 'leased'
              AND lease_expires_at > NOW()
            "#,
        )
        .bind(lease.message_id)
        .bind(lease.receipt)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::InvalidLease(lease.message_id));
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<SweepReport, QueueError> {
        let (redelivered, dead_lettered) = self.expire_leases().await?;

        let dedup_purged = sqlx::query(
            r#"
            DELETE FROM event_dedup_tokens
            WHERE recorded_at <= NOW() - ($1 || ' milliseconds')::INTERVAL
            "#,
        )
        .bind(self.dedup_window_ms())
        .execute(&self.pool)
        .await?
        .rows_affected() as usize;

        Ok(SweepReport {
            redelivered,
            dead_lettered,
            dedup_purged,
        })
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) FILTER (
                    WHERE status = 'pending'
                       OR (status = 'leased' AND lease_expires_at <= NOW())
                ) AS pending,
                COUNT(*) FILTER (
                    WHERE status = 'leased' AND lease_expires_at > NOW()
                ) AS leased,
                COUNT(*) FILTER (WHERE status = 'dead_letter') AS dead_lettered
            FROM event_messages
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.pending.max(0) as u64,
            leased: row.leased.max(0) as u64,
            dead_lettered: row.dead_lettered.max(0) as u64,
        })
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            SELECT id, ordering_key, dedup_token, payload, enqueued_at, receive_count,
                   dead_letter_reason, dead_lettered_at
            FROM event_messages
            WHERE status = 'dead_letter'
            ORDER BY dead_lettered_at, seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    reason: row.dead_letter_reason.unwrap_or_default(),
                    dead_lettered_at: row.dead_lettered_at.unwrap_or_else(Utc::now),
                    message: EventMessage::try_from(row.message)?,
                })
            })
            .collect()
    }
}
