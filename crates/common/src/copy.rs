//! Moves blob content between the source, backup and restore accounts.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::blob_store::{stream_copy, BlobStore, BlobStoreError};
use crate::event::{AddressError, BlobAddress, CreatedEvent, DeletedEvent};
use crate::event_log::{backup_address, DestinationBlobInfo, SYNC_COPY_REFERENCE};
use crate::partition::PartitionCoordinates;

pub const DEFAULT_GRANT_EXPIRY_MINUTES: i64 = 60;
pub const DEFAULT_GRANT_CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("event does not address a blob: {0}")]
    Address(#[from] AddressError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

/// How bytes get from one account to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// The destination account pulls the source through a read grant.
    ///  Completes asynchronously; the copy id is all we get back.
    ServerCopy,
    /// Bytes are streamed through this process before returning.
    DirectTransfer,
}

impl TransferStrategy {
    pub fn from_server_copy(server_copy: bool) -> Self {
        if server_copy {
            TransferStrategy::ServerCopy
        } else {
            TransferStrategy::DirectTransfer
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CopySettings {
    pub strategy: TransferStrategy,
    pub grant_expiry: Duration,
    /// How far in the past a grant starts to be valid
    pub grant_clock_skew: Duration,
}

impl CopySettings {
    /// Validity window of a read grant minted at `now`, or `None` when it
    ///  falls outside the representable time range.
    pub fn grant_window(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let valid_from = now.checked_sub_signed(self.grant_clock_skew)?;
        let valid_to = now.checked_add_signed(self.grant_expiry)?;
        Some((valid_from, valid_to))
    }
}

impl Default for CopySettings {
    fn default() -> Self {
        Self {
            strategy: TransferStrategy::DirectTransfer,
            grant_expiry: Duration::minutes(DEFAULT_GRANT_EXPIRY_MINUTES),
            grant_clock_skew: Duration::minutes(DEFAULT_GRANT_CLOCK_SKEW_MINUTES),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlobCopier {
    source: Arc<dyn BlobStore>,
    backup: Arc<dyn BlobStore>,
    restore: Arc<dyn BlobStore>,
    settings: CopySettings,
}

impl BlobCopier {
    pub fn new(
        source: Arc<dyn BlobStore>,
        backup: Arc<dyn BlobStore>,
        restore: Arc<dyn BlobStore>,
        settings: CopySettings,
    ) -> Self {
        Self {
            source,
            backup,
            restore,
            settings,
        }
    }

    pub fn settings(&self) -> &CopySettings {
        &self.settings
    }

    /// Copy the blob a created event refers to into the backup account.
    ///
    /// Returns `None` when the source blob is already gone, which is an
    ///  expected outcome: it may have been deleted after the event fired.
    pub async fn copy_to_backup(
        &self,
        event: &CreatedEvent,
    ) -> Result<Option<DestinationBlobInfo>, CopyError> {
        let source = BlobAddress::from_url(&event.data.url)?;
        if !self.source.exists(&source).await? {
            info!(
                event_id = %event.id,
                blob = %source,
                account = self.source.account(),
                "source blob no longer exists, nothing to back up"
            );
            return Ok(None);
        }

        let coordinates = PartitionCoordinates::from_instant(event.event_time);
        let destination = backup_address(&coordinates, &source);
        if self.backup.ensure_container(&destination.container).await? {
            debug!(container = %destination.container, "created backup container");
        }

        let reference = self
            .transfer(
                self.source.as_ref(),
                &source,
                self.backup.as_ref(),
                &destination,
            )
            .await?;

        info!(
            event_id = %event.id,
            from = %source,
            to = %destination,
            copy_reference = %reference,
            "backed up blob"
        );
        Ok(Some(DestinationBlobInfo::for_source(
            &coordinates,
            &source,
            reference,
        )))
    }

    /// Copy a backed up blob to its original location in the restore
    ///  account. Returns `None` if the backup copy is missing.
    pub async fn copy_from_backup_to_restore(
        &self,
        info: &DestinationBlobInfo,
    ) -> Result<Option<String>, CopyError> {
        let backup = info.backup_address();
        if !self.backup.container_exists(&backup.container).await? {
            warn!(container = %backup.container, "backup container does not exist");
            return Ok(None);
        }
        if !self.backup.exists(&backup).await? {
            warn!(blob = %backup, "backup blob does not exist");
            return Ok(None);
        }

        let original = info.original_address();
        if self.restore.ensure_container(&original.container).await? {
            debug!(container = %original.container, "created restore container");
        }

        let reference = self
            .transfer(
                self.backup.as_ref(),
                &backup,
                self.restore.as_ref(),
                &original,
            )
            .await?;

        info!(
            from = %backup,
            to = %original,
            copy_reference = %reference,
            "restored blob"
        );
        Ok(Some(reference))
    }

    /// Delete the blob a deleted event refers to from the restore account.
    ///  Returns whether anything was deleted.
    pub async fn delete_from_restore(&self, event: &DeletedEvent) -> Result<bool, CopyError> {
        let target = BlobAddress::from_url(&event.data.url)?;
        if !self.restore.container_exists(&target.container).await? {
            debug!(container = %target.container, "restore container does not exist");
            return Ok(false);
        }

        let deleted = self.restore.delete_if_exists(&target).await?;
        if deleted {
            info!(event_id = %event.id, blob = %target, "deleted blob from restore account");
        } else {
            debug!(event_id = %event.id, blob = %target, "blob already absent from restore account");
        }
        Ok(deleted)
    }

    async fn transfer(
        &self,
        from_store: &dyn BlobStore,
        from: &BlobAddress,
        to_store: &dyn BlobStore,
        to: &BlobAddress,
    ) -> Result<String, BlobStoreError> {
        match self.settings.strategy {
            TransferStrategy::ServerCopy => {
                let (valid_from, valid_to) =
                    self.settings.grant_window(Utc::now()).ok_or_else(|| {
                        BlobStoreError::GrantRejected(
                            "grant window is outside the supported time range".to_string(),
                        )
                    })?;
                let grant = from_store
                    .mint_read_grant(from, valid_from, valid_to)
                    .await?;
                to_store.begin_server_copy(to, &grant).await
            }
            TransferStrategy::DirectTransfer => {
                let bytes = stream_copy(from_store, from, to_store, to).await?;
                debug!(from = %from, to = %to, bytes = bytes, "streamed blob");
                Ok(SYNC_COPY_REFERENCE.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::MemoryBlobCloud;
    use crate::event::BlobEvent;
    use crate::testkit::events;
    use bytes::Bytes;
    use chrono::TimeZone;

    fn copier(cloud: &MemoryBlobCloud, strategy: TransferStrategy) -> BlobCopier {
        BlobCopier::new(
            Arc::new(cloud.account("source")),
            Arc::new(cloud.account("backup")),
            Arc::new(cloud.account("restore")),
            CopySettings {
                strategy,
                ..CopySettings::default()
            },
        )
    }

    fn created(container: &str, blob: &str) -> CreatedEvent {
        let time = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        match events::created("evt-1", time, container, blob) {
            BlobEvent::Created(event) => event,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_grant_window_defaults() {
        let now = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let (valid_from, valid_to) = CopySettings::default().grant_window(now).unwrap();
        assert_eq!(valid_from, now - Duration::minutes(5));
        assert_eq!(valid_to, now + Duration::minutes(60));
    }

    #[tokio::test]
    async fn test_unrepresentable_grant_window_fails_the_copy() {
        let cloud = MemoryBlobCloud::new();
        cloud.account("source").put_blob(
            &BlobAddress::new("container", "file.bin"),
            Bytes::from_static(b"data"),
        );
        let copier = BlobCopier::new(
            Arc::new(cloud.account("source")),
            Arc::new(cloud.account("backup")),
            Arc::new(cloud.account("restore")),
            CopySettings {
                strategy: TransferStrategy::ServerCopy,
                grant_expiry: Duration::MAX,
                ..CopySettings::default()
            },
        );

        assert!(CopySettings {
            grant_expiry: Duration::MAX,
            ..CopySettings::default()
        }
        .grant_window(Utc::now())
        .is_none());
        assert!(matches!(
            copier.copy_to_backup(&created("container", "file.bin")).await,
            Err(CopyError::Store(BlobStoreError::GrantRejected(_)))
        ));
    }

    #[tokio::test]
    async fn test_direct_transfer_to_backup() {
        let cloud = MemoryBlobCloud::new();
        let source = cloud.account("source");
        source.put_blob(
            &BlobAddress::new("container", "file.bin"),
            Bytes::from_static(b"data"),
        );

        let info = copier(&cloud, TransferStrategy::DirectTransfer)
            .copy_to_backup(&created("container", "file.bin"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(info.container_name, "2023");
        assert_eq!(info.blob_name, "wk11/dy3/container/file.bin");
        assert_eq!(info.copy_reference_id, SYNC_COPY_REFERENCE);
        assert_eq!(
            cloud.account("backup").blob_bytes(&info.backup_address()),
            Some(Bytes::from_static(b"data"))
        );
    }

    #[tokio::test]
    async fn test_server_copy_to_backup() {
        let cloud = MemoryBlobCloud::new();
        cloud.account("source").put_blob(
            &BlobAddress::new("container", "file.bin"),
            Bytes::from_static(b"data"),
        );

        let info = copier(&cloud, TransferStrategy::ServerCopy)
            .copy_to_backup(&created("container", "file.bin"))
            .await
            .unwrap()
            .unwrap();

        let backup = cloud.account("backup");
        assert_eq!(backup.server_copies(), vec![info.copy_reference_id.clone()]);
        assert!(!info.is_direct_transfer());
        assert!(backup.blob_bytes(&info.backup_address()).is_some());
    }

    #[tokio::test]
    async fn test_missing_source_is_not_an_error() {
        let cloud = MemoryBlobCloud::new();
        let result = copier(&cloud, TransferStrategy::DirectTransfer)
            .copy_to_backup(&created("container", "gone.bin"))
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(cloud.account("backup").containers().is_empty());
    }

    #[tokio::test]
    async fn test_restore_tolerates_missing_backup() {
        let cloud = MemoryBlobCloud::new();
        let copier = copier(&cloud, TransferStrategy::DirectTransfer);
        let coordinates =
            PartitionCoordinates::from_instant(Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap());
        let info = DestinationBlobInfo::for_source(
            &coordinates,
            &BlobAddress::new("c", "b"),
            SYNC_COPY_REFERENCE,
        );

        // no container at all
        assert!(copier
            .copy_from_backup_to_restore(&info)
            .await
            .unwrap()
            .is_none());

        // container but no blob
        cloud.account("backup").ensure_container("2023").await.unwrap();
        assert!(copier
            .copy_from_backup_to_restore(&info)
            .await
            .unwrap()
            .is_none());
        assert!(cloud.account("restore").containers().is_empty());
    }

    #[tokio::test]
    async fn test_delete_from_restore() {
        let cloud = MemoryBlobCloud::new();
        let copier = copier(&cloud, TransferStrategy::DirectTransfer);
        let time = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let BlobEvent::Deleted(event) = events::deleted("d-1", time, "c", "b") else {
            panic!("expected deleted event");
        };

        // container absent
        assert!(!copier.delete_from_restore(&event).await.unwrap());

        let restore = cloud.account("restore");
        restore.put_blob(&BlobAddress::new("c", "b"), Bytes::from_static(b"x"));
        assert!(copier.delete_from_restore(&event).await.unwrap());
        assert!(!copier.delete_from_restore(&event).await.unwrap());
    }
}
