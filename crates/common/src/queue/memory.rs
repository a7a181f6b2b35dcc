use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{EventQueue, QueueError, QueueMessage};

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    payload: String,
    receipt: Option<String>,
    visible_at: Instant,
    dequeue_count: u32,
}

/// In-memory queue with visibility timeouts.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventQueue {
    entries: Arc<Mutex<Vec<Entry>>>,
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn enqueue(&self, payload: &str) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        self.entries.lock().push(Entry {
            id: id.clone(),
            payload: payload.to_string(),
            receipt: None,
            visible_at: Instant::now(),
            dequeue_count: 0,
        });
        Ok(id)
    }

    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let mut messages = Vec::new();
        for entry in entries.iter_mut() {
            if messages.len() >= max {
                break;
            }
            if entry.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            entry.receipt = Some(receipt.clone());
            entry.visible_at = now + visibility_timeout;
            entry.dequeue_count += 1;

            messages.push(QueueMessage {
                id: entry.id.clone(),
                payload: entry.payload.clone(),
                receipt,
                dequeue_count: entry.dequeue_count,
            });
        }
        Ok(messages)
    }

    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let position = entries
            .iter()
            .position(|entry| entry.id == message.id)
            .ok_or_else(|| QueueError::MessageNotFound(message.id.clone()))?;

        if entries[position].receipt.as_deref() != Some(message.receipt.as_str()) {
            return Err(QueueError::ReceiptMismatch(message.id.clone()));
        }
        entries.remove(position);
        Ok(())
    }

    async fn approximate_len(&self) -> Result<u64, QueueError> {
        Ok(self.entries.lock().len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_hides_messages() {
        let queue = MemoryEventQueue::new();
        for payload in ["a", "b", "c"] {
            queue.enqueue(payload).await.unwrap();
        }

        let first = queue
            .receive_batch(2, Duration::from_secs(60))
            .await
            .unwrap();
        let payloads: Vec<_> = first.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["a", "b"]);

        let second = queue
            .receive_batch(10, Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, "c");
        assert_eq!(queue.approximate_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let queue = MemoryEventQueue::new();
        queue.enqueue("payload").await.unwrap();

        let first = queue.receive_batch(1, Duration::ZERO).await.unwrap();
        let second = queue.receive_batch(1, Duration::ZERO).await.unwrap();
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].dequeue_count, 2);

        // the first receipt went stale with the redelivery
        assert!(matches!(
            queue.ack(&first[0]).await,
            Err(QueueError::ReceiptMismatch(_))
        ));
        queue.ack(&second[0]).await.unwrap();
        assert_eq!(queue.approximate_len().await.unwrap(), 0);
        assert!(matches!(
            queue.ack(&second[0]).await,
            Err(QueueError::MessageNotFound(_))
        ));
    }
}
