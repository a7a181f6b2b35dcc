//! Ingress queue of raw event payloads.
//!
//! At-least-once delivery: a received message stays invisible for its
//!  visibility timeout and becomes receivable again unless it is acked
//!  before then. Each delivery carries a fresh receipt; only the receipt
//!  from the latest delivery can ack the message.

mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryEventQueue;

/// Upper bound on messages handed out by one receive.
pub const MAX_BATCH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("message {0} not found")]
    MessageNotFound(String),
    #[error("receipt for message {0} is stale, it was redelivered")]
    ReceiptMismatch(String),
    #[error("queue backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub payload: String,
    /// Proof of this delivery, required to ack
    pub receipt: String,
    /// How many times the message has been received, this delivery included
    pub dequeue_count: u32,
}

#[async_trait]
pub trait EventQueue: Send + Sync + std::fmt::Debug {
    /// Add a payload to the back of the queue. Returns the message id.
    async fn enqueue(&self, payload: &str) -> Result<String, QueueError>;

    /// Receive up to `max` visible messages, oldest first, hiding each for
    ///  `visibility_timeout`.
    async fn receive_batch(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Remove a received message for good.
    async fn ack(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Messages currently stored, visible or not.
    async fn approximate_len(&self) -> Result<u64, QueueError>;
}

/// Clamp a configured batch size to what a receive can return.
pub fn clamp_batch_size(requested: usize) -> usize {
    requested.clamp(1, MAX_BATCH_SIZE)
}
