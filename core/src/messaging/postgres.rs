//! PostgreSQL-backed outbox/queue broker, grounded in
//! `federation::queue::OutboundQueue`: a single status-columned table,
//! `FOR UPDATE SKIP LOCKED` to let multiple worker replicas poll safely,
//! and the same capped-exponential retry backoff on nack.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{MessagingError, Publisher, ReceivedMessage, Subscriber};

/// Mirrors `federation::queue`'s own backoff ladder: 5s, 10s, 20s, ...,
/// capped at 300s.
fn backoff_delay(retry_count: i32) -> chrono::Duration {
    let capped_exponent = retry_count.clamp(0, 6) as u32;
    let seconds = 5i64.saturating_mul(1i64 << capped_exponent);
    chrono::Duration::seconds(seconds.min(300))
}

pub struct PostgresBroker {
    pool: PgPool,
}

impl PostgresBroker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), MessagingError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messaging_queue (
                id UUID PRIMARY KEY,
                topic TEXT NOT NULL,
                group_id TEXT NOT NULL,
                dedup_id TEXT NOT NULL,
                body TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INT NOT NULL DEFAULT 0,
                next_retry_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (topic, dedup_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS messaging_queue_poll_idx
             ON messaging_queue (topic, status, next_retry_at, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    /// Drops delivered rows older than `older_than`, mirroring
    /// `federation::queue::cleanup_old`.
    pub async fn cleanup_delivered(&self, older_than: DateTime<Utc>) -> Result<u64, MessagingError> {
        let result = sqlx::query("DELETE FROM messaging_queue WHERE status = 'delivered' AND created_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Publisher for PostgresBroker {
    async fn publish_raw(
        &self,
        topic: &'static str,
        group_id: String,
        deduplication_id: String,
        body: String,
    ) -> Result<(), MessagingError> {
        sqlx::query(
            "INSERT INTO messaging_queue (id, topic, group_id, dedup_id, body)
             VALUES (gen_random_uuid(), $1, $2, $3, $4)
             ON CONFLICT (topic, dedup_id) DO NOTHING",
        )
        .bind(topic)
        .bind(group_id)
        .bind(deduplication_id)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Subscriber for PostgresBroker {
    async fn receive(&self, topic: &'static str) -> Result<Option<ReceivedMessage>, MessagingError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;

        let row = sqlx::query(
            "SELECT id, body FROM messaging_queue
             WHERE topic = $1 AND status = 'pending' AND next_retry_at <= NOW()
             ORDER BY created_at ASC
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
        )
        .bind(topic)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;

        let Some(row) = row else {
            tx.commit().await.ok();
            return Ok(None);
        };

        let id: uuid::Uuid = row.get("id");
        let body: String = row.get("body");

        sqlx::query("UPDATE messaging_queue SET status = 'in_flight' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;

        tx.commit().await.map_err(|e| MessagingError::ReceiveFailed(e.to_string()))?;

        Ok(Some(ReceivedMessage {
            id: id.to_string(),
            body,
        }))
    }

    async fn ack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError> {
        let id: uuid::Uuid = id.parse().map_err(|e: uuid::Error| MessagingError::AckFailed(e.to_string()))?;
        sqlx::query("DELETE FROM messaging_queue WHERE id = $1 AND topic = $2")
            .bind(id)
            .bind(topic)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::AckFailed(e.to_string()))?;
        Ok(())
    }

    async fn nack(&self, topic: &'static str, id: &str) -> Result<(), MessagingError> {
        let id: uuid::Uuid = id.parse().map_err(|e: uuid::Error| MessagingError::AckFailed(e.to_string()))?;
        let row = sqlx::query("SELECT retry_count FROM messaging_queue WHERE id = $1 AND topic = $2")
            .bind(id)
            .bind(topic)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::AckFailed(e.to_string()))?;
        let Some(row) = row else {
            return Ok(());
        };
        let retry_count: i32 = row.get("retry_count");
        let next_retry_at = Utc::now() + backoff_delay(retry_count);

        sqlx::query(
            "UPDATE messaging_queue
             SET status = 'pending', retry_count = retry_count + 1, next_retry_at = $3
             WHERE id = $1 AND topic = $2",
        )
        .bind(id)
        .bind(topic)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MessagingError::AckFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_300_seconds() {
        assert_eq!(backoff_delay(0), chrono::Duration::seconds(5));
        assert_eq!(backoff_delay(1), chrono::Duration::seconds(10));
        assert_eq!(backoff_delay(4), chrono::Duration::seconds(80));
        assert_eq!(backoff_delay(10), chrono::Duration::seconds(300));
    }
}
