use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;

use crate::backup::{BackupSettings, BackupWorker};
use crate::blob_store::{MemoryBlobCloud, MemoryBlobStore};
use crate::copy::{BlobCopier, CopySettings, TransferStrategy};
use crate::event::BlobAddress;
use crate::event_log::{EventLog, EventLogProvider, MemoryEventLogProvider};
use crate::queue::MemoryEventQueue;
use crate::restore::RestoreWorker;

/// A fully in-memory deployment: three accounts, a queue and a log.
pub struct TestEnv {
    pub cloud: MemoryBlobCloud,
    pub source: MemoryBlobStore,
    pub backup: MemoryBlobStore,
    pub restore: MemoryBlobStore,
    pub queue: MemoryEventQueue,
    pub log_provider: MemoryEventLogProvider,
    pub copy_settings: CopySettings,
    /// Unacked messages are redelivered on the very next receive
    pub backup_settings: BackupSettings,
    /// Shutdown signal handed to workers
    pub shutdown: watch::Receiver<()>,
    shutdown_tx: watch::Sender<()>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_strategy(TransferStrategy::DirectTransfer)
    }

    pub fn with_strategy(strategy: TransferStrategy) -> Self {
        let cloud = MemoryBlobCloud::new();
        let (shutdown_tx, shutdown) = watch::channel(());

        Self {
            source: cloud.account("source"),
            backup: cloud.account("backup"),
            restore: cloud.account("restore"),
            cloud,
            queue: MemoryEventQueue::new(),
            log_provider: MemoryEventLogProvider::new(),
            copy_settings: CopySettings {
                strategy,
                ..CopySettings::default()
            },
            backup_settings: BackupSettings {
                batch_size: crate::queue::MAX_BATCH_SIZE,
                visibility_timeout: Duration::ZERO,
                poll_interval: Duration::from_millis(10),
            },
            shutdown,
            shutdown_tx,
        }
    }

    /// Store a blob in the source account.
    pub fn put_source(&self, container: &str, blob: &str, data: &'static [u8]) {
        self.source
            .put_blob(&BlobAddress::new(container, blob), Bytes::from_static(data));
    }

    pub fn copier(&self) -> BlobCopier {
        BlobCopier::new(
            Arc::new(self.source.clone()),
            Arc::new(self.backup.clone()),
            Arc::new(self.restore.clone()),
            self.copy_settings,
        )
    }

    pub fn log(&self) -> EventLog<MemoryEventLogProvider> {
        EventLog::new(self.log_provider.clone())
    }

    pub fn backup_worker(&self) -> BackupWorker<MemoryEventQueue, MemoryEventLogProvider> {
        self.backup_worker_with(self.log())
    }

    /// Backup worker over a caller supplied log.
    pub fn backup_worker_with<P: EventLogProvider>(
        &self,
        log: EventLog<P>,
    ) -> BackupWorker<MemoryEventQueue, P> {
        BackupWorker::new(
            self.queue.clone(),
            log,
            self.copier(),
            self.backup_settings,
        )
    }

    pub fn restore_worker(&self) -> RestoreWorker<MemoryEventLogProvider> {
        RestoreWorker::new(self.log(), self.copier())
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
