//! The backup path: queue -> copy -> event log -> ack.

use std::ops::AddAssign;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::copy::{BlobCopier, CopyError};
use crate::event::BlobEvent;
use crate::event_log::{EventLog, EventLogProvider, LogRecord, RecordError};
use crate::queue::{clamp_batch_size, EventQueue, QueueError, QueueMessage};

pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("copy failed: {0}")]
    Copy(#[from] CopyError),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("event log append failed: {0}")]
    Append(String),
}

#[derive(Debug, Clone, Copy)]
pub struct BackupSettings {
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::queue::MAX_BATCH_SIZE,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Tally of one or more backup passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupSummary {
    pub received: u64,
    pub acknowledged: u64,
    pub copied: u64,
    pub source_missing: u64,
    pub undecodable: u64,
    pub failed: u64,
}

impl AddAssign for BackupSummary {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.acknowledged += other.acknowledged;
        self.copied += other.copied;
        self.source_missing += other.source_missing;
        self.undecodable += other.undecodable;
        self.failed += other.failed;
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageOutcome {
    Copied,
    SourceMissing,
    DeletionLogged,
    /// Left on the queue for redelivery
    Undecodable,
}

#[derive(Debug, Clone)]
pub struct BackupWorker<Q, P> {
    queue: Q,
    log: EventLog<P>,
    copier: BlobCopier,
    settings: BackupSettings,
}

impl<Q, P> BackupWorker<Q, P>
where
    Q: EventQueue,
    P: EventLogProvider,
{
    pub fn new(queue: Q, log: EventLog<P>, copier: BlobCopier, settings: BackupSettings) -> Self {
        Self {
            queue,
            log,
            copier,
            settings: BackupSettings {
                batch_size: clamp_batch_size(settings.batch_size),
                ..settings
            },
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Drain one batch from the queue, processing messages in order.
    ///
    /// A failing message is logged with its payload and left unacked; the
    ///  rest of the batch still runs. Stops early, between messages, once
    ///  `shutdown` fires.
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<()>,
    ) -> Result<BackupSummary, BackupError> {
        let messages = self
            .queue
            .receive_batch(self.settings.batch_size, self.settings.visibility_timeout)
            .await?;

        let mut summary = BackupSummary::default();
        for message in messages {
            if shutdown.has_changed().unwrap_or(true) {
                info!("shutdown requested, leaving remaining messages for redelivery");
                break;
            }
            summary.received += 1;

            match self.process(&message).await {
                Ok(outcome) => {
                    match outcome {
                        MessageOutcome::Copied => summary.copied += 1,
                        MessageOutcome::SourceMissing => summary.source_missing += 1,
                        MessageOutcome::DeletionLogged => {}
                        MessageOutcome::Undecodable => {
                            summary.undecodable += 1;
                            continue;
                        }
                    }
                    summary.acknowledged += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        message_id = %message.id,
                        dequeue_count = message.dequeue_count,
                        payload = %message.payload,
                        "failed to back up message: {}",
                        e
                    );
                }
            }
        }

        if summary.received > 0 {
            info!(
                received = summary.received,
                acknowledged = summary.acknowledged,
                copied = summary.copied,
                source_missing = summary.source_missing,
                undecodable = summary.undecodable,
                failed = summary.failed,
                "backup pass complete"
            );
        }
        Ok(summary)
    }

    async fn process(&self, message: &QueueMessage) -> Result<MessageOutcome, BackupError> {
        let event = BlobEvent::decode(&message.payload);

        let (record, outcome) = match event {
            BlobEvent::Malformed(malformed) => {
                warn!(
                    message_id = %message.id,
                    event_id = ?malformed.id,
                    event_type = ?malformed.event_type,
                    payload = %message.payload,
                    "skipping undecodable event: {}",
                    malformed.reason
                );
                return Ok(MessageOutcome::Undecodable);
            }
            BlobEvent::Created(created) => {
                let destination = self.copier.copy_to_backup(&created).await?;
                let outcome = if destination.is_some() {
                    MessageOutcome::Copied
                } else {
                    MessageOutcome::SourceMissing
                };
                (
                    LogRecord::new(BlobEvent::Created(created), destination)?,
                    outcome,
                )
            }
            BlobEvent::Deleted(deleted) => {
                debug!(event_id = %deleted.id, url = %deleted.data.url, "logging deletion");
                (
                    LogRecord::new(BlobEvent::Deleted(deleted), None)?,
                    MessageOutcome::DeletionLogged,
                )
            }
        };

        self.log
            .append(&record)
            .await
            .map_err(|e| BackupError::Append(e.to_string()))?;
        self.queue.ack(message).await?;

        debug!(
            message_id = %message.id,
            partition_key = %record.partition_key,
            row_key = %record.row_key,
            "message logged and acknowledged"
        );
        Ok(outcome)
    }
}

/// Timer driven backup loop.
///
/// Passes run one at a time on a single task: the next poll is only
///  scheduled once the previous pass has finished.
#[derive(Debug, Clone)]
pub struct BackupService<Q, P> {
    worker: BackupWorker<Q, P>,
}

impl<Q, P> BackupService<Q, P>
where
    Q: EventQueue,
    P: EventLogProvider,
{
    pub fn new(worker: BackupWorker<Q, P>) -> Self {
        Self { worker }
    }

    pub fn worker(&self) -> &BackupWorker<Q, P> {
        &self.worker
    }

    /// Run passes until `shutdown` fires. Returns the running tally.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) -> BackupSummary {
        let poll_interval = self.worker.settings().poll_interval;
        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            batch_size = self.worker.settings().batch_size,
            "backup service started"
        );

        let mut total = BackupSummary::default();
        loop {
            match self.worker.run_once(&shutdown).await {
                Ok(summary) => total += summary,
                Err(e) => error!("backup pass failed: {}", e),
            }

            if shutdown.has_changed().unwrap_or(true) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(
            received = total.received,
            acknowledged = total.acknowledged,
            failed = total.failed,
            "backup service stopped"
        );
        total
    }
}
