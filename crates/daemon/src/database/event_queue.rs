//! Durable ingress queue stored next to the event log.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use common::queue::{EventQueue, QueueError, QueueMessage};

use super::Database;

/// A named queue inside the `event_queue` table.
#[derive(Debug, Clone)]
pub struct SqliteEventQueue {
    db: Database,
    name: String,
}

impl SqliteEventQueue {
    pub fn new(db: Database, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn backend(e: sqlx::Error) -> QueueError {
    QueueError::Backend(e.to_string())
}

#[async_trait]
impl EventQueue for SqliteEventQueue {
    async fn enqueue(&self, payload: &str) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO event_queue (id, queue_name, payload, receipt, visible_at, dequeue_count, inserted_at)
            VALUES (?, ?, ?, NULL, ?, 0, ?)
            "#,
        )
        .bind(&id)
        .bind(&self.name)
        .bind(payload)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await
        .map_err(backend)?;

        Ok(id)
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Utc::now().timestamp_millis();
        let visible_at = now.saturating_add(visibility_timeout.as_millis() as i64);

        let mut tx = self.db.begin().await.map_err(backend)?;

        let rows = sqlx::query(
            r#"
            SELECT id, payload, dequeue_count
            FROM event_queue
            WHERE queue_name = ? AND visible_at <= ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(&self.name)
        .bind(now)
        .bind(max as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(backend)?;
            let payload: String = row.try_get("payload").map_err(backend)?;
            let dequeue_count: i64 = row.try_get("dequeue_count").map_err(backend)?;
            let receipt = Uuid::new_v4().to_string();

            sqlx::query(
                r#"
                UPDATE event_queue
                SET receipt = ?, visible_at = ?, dequeue_count = dequeue_count + 1
                WHERE id = ?
                "#,
            )
            .bind(&receipt)
            .bind(visible_at)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

            messages.push(QueueMessage {
                id,
                payload,
                receipt,
                dequeue_count: (dequeue_count + 1) as u32,
            });
        }

        tx.commit().await.map_err(backend)?;
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM event_queue
            WHERE queue_name = ? AND id = ? AND receipt = ?
            "#,
        )
        .bind(&self.name)
        .bind(&message.id)
        .bind(&message.receipt)
        .execute(&*self.db)
        .await
        .map_err(backend)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let still_queued = sqlx::query(
            r#"
            SELECT 1 FROM event_queue WHERE queue_name = ? AND id = ?
            "#,
        )
        .bind(&self.name)
        .bind(&message.id)
        .fetch_optional(&*self.db)
        .await
        .map_err(backend)?;

        match still_queued {
            Some(_) => Err(QueueError::ReceiptMismatch(message.id.clone())),
            None => Err(QueueError::MessageNotFound(message.id.clone())),
        }
    }

    async fn approximate_len(&self) -> Result<u64, QueueError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM event_queue WHERE queue_name = ?
            "#,
        )
        .bind(&self.name)
        .fetch_one(&*self.db)
        .await
        .map_err(backend)?;

        let count: i64 = row.try_get("count").map_err(backend)?;
        Ok(count as u64)
    }
}
