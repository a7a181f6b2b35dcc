/**
 * The backup path: drain the ingress queue, copy
 *  created blobs into the backup account, log every
 *  event, then acknowledge.
 */
pub mod backup;
/**
 * Storage account abstraction plus an in-memory
 *  multi-account implementation.
 */
pub mod blob_store;
/**
 * Blob copy engine shared by backup and restore,
 *  with server side and direct transfer strategies.
 */
pub mod copy;
/**
 * Blob change events and their JSON codec.
 */
pub mod event;
/**
 * Week-partitioned durable log of observed events.
 */
pub mod event_log;
/**
 * Partition and row key derivation from event time.
 */
pub mod partition;
/**
 * At-least-once ingress queue abstraction.
 */
pub mod queue;
/**
 * The restore path: replay logged events day by
 *  day against the restore account.
 */
pub mod restore;
/**
 * In-memory fixtures for integration tests.
 */
pub mod testkit;
/**
 * Helper for setting build version information
 *  at compile time.
 */
pub mod version;

pub mod prelude {
    pub use crate::backup::{BackupService, BackupSettings, BackupSummary, BackupWorker};
    pub use crate::blob_store::{BlobStore, BlobStoreError};
    pub use crate::copy::{BlobCopier, CopySettings, TransferStrategy};
    pub use crate::event::{BlobAddress, BlobEvent, EventKind};
    pub use crate::event_log::{EventLog, EventLogError, EventLogProvider};
    pub use crate::partition::PartitionCoordinates;
    pub use crate::queue::{EventQueue, QueueError, QueueMessage};
    pub use crate::restore::{RestoreSummary, RestoreWindow, RestoreWorker};
    pub use crate::version::BuildInfo;
}
