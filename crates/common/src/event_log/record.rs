use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{BlobAddress, BlobEvent, EventCodecError, EventKind};
use crate::partition::PartitionCoordinates;

/// Copy reference recorded for direct (client streamed) transfers, which
///  have no service side operation to track.
pub const SYNC_COPY_REFERENCE: &str = "SYNCCOPY";

/// Where the backed up bytes of a created blob landed, and where they
///  came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationBlobInfo {
    /// Container in the backup account (the event year)
    pub container_name: String,
    /// `wk{week}/dy{day}/{org_container}/{org_blob}`
    pub blob_name: String,
    pub org_container_name: String,
    pub org_blob_name: String,
    /// Server copy operation id, or [`SYNC_COPY_REFERENCE`]
    pub copy_reference_id: String,
}

impl DestinationBlobInfo {
    /// Build the destination for a blob observed at `coordinates`.
    pub fn for_source(
        coordinates: &PartitionCoordinates,
        source: &BlobAddress,
        copy_reference_id: impl Into<String>,
    ) -> Self {
        let address = backup_address(coordinates, source);
        Self {
            container_name: address.container,
            blob_name: address.blob,
            org_container_name: source.container.clone(),
            org_blob_name: source.blob.clone(),
            copy_reference_id: copy_reference_id.into(),
        }
    }

    pub fn backup_address(&self) -> BlobAddress {
        BlobAddress::new(&self.container_name, &self.blob_name)
    }

    pub fn original_address(&self) -> BlobAddress {
        BlobAddress::new(&self.org_container_name, &self.org_blob_name)
    }

    pub fn is_direct_transfer(&self) -> bool {
        self.copy_reference_id == SYNC_COPY_REFERENCE
    }
}

/// Location inside the backup account for a source blob observed at
///  `coordinates`.
pub fn backup_address(coordinates: &PartitionCoordinates, source: &BlobAddress) -> BlobAddress {
    BlobAddress::new(
        coordinates.year.to_string(),
        format!(
            "wk{}/dy{}/{}/{}",
            coordinates.week, coordinates.day_of_week, source.container, source.blob
        ),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("event cannot be logged: {0}")]
    Unloggable(String),
    #[error("codec error: {0}")]
    Codec(#[from] EventCodecError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One observed event plus the outcome of backing it up. Immutable once
///  appended.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub partition_key: String,
    pub row_key: String,
    pub event: BlobEvent,
    pub destination: Option<DestinationBlobInfo>,
}

impl LogRecord {
    pub fn new(
        event: BlobEvent,
        destination: Option<DestinationBlobInfo>,
    ) -> Result<Self, RecordError> {
        let (Some(id), Some(coordinates)) = (event.id(), event.coordinates()) else {
            return Err(RecordError::Unloggable(
                "event has no id or event time".to_string(),
            ));
        };
        if let BlobEvent::Malformed(malformed) = &event {
            return Err(RecordError::Unloggable(malformed.reason.clone()));
        }
        let partition_key = coordinates.partition_key();
        let row_key = coordinates.row_key(id);

        Ok(Self {
            partition_key,
            row_key,
            event,
            destination,
        })
    }

    pub fn to_stored(&self) -> Result<StoredRecord, RecordError> {
        let destination_json = self
            .destination
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        Ok(StoredRecord {
            partition_key: self.partition_key.clone(),
            row_key: self.row_key.clone(),
            event_json: self.event.to_json()?,
            destination_json,
            recorded_at: Utc::now(),
        })
    }
}

/// The persisted shape of a [`LogRecord`]: keys plus serialized payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub partition_key: String,
    pub row_key: String,
    pub event_json: String,
    pub destination_json: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Decode the payloads. Undecodable payloads are carried through as
    ///  [`BlobEvent::Malformed`] / [`BackupOutcome::Unreadable`] so one bad
    ///  row never hides its neighbours.
    pub fn into_entry(self) -> LogEntry {
        let event = BlobEvent::decode(&self.event_json);
        let outcome = match (&self.destination_json, event.kind()) {
            (Some(json), _) => match serde_json::from_str(json) {
                Ok(info) => BackupOutcome::Copied(info),
                Err(e) => BackupOutcome::Unreadable(format!("invalid destination info: {}", e)),
            },
            (None, Some(EventKind::Created)) => BackupOutcome::SourceMissing,
            (None, _) => BackupOutcome::NotApplicable,
        };

        LogEntry {
            partition_key: self.partition_key,
            row_key: self.row_key,
            event,
            event_json: self.event_json,
            outcome,
            recorded_at: self.recorded_at,
        }
    }
}

/// What the backup path did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// Bytes were copied into the backup account
    Copied(DestinationBlobInfo),
    /// Created event whose source blob was gone by the time we looked
    SourceMissing,
    /// Deletions are only logged
    NotApplicable,
    /// Destination info was stored but cannot be decoded
    Unreadable(String),
}

/// A record read back from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub partition_key: String,
    pub row_key: String,
    pub event: BlobEvent,
    /// Raw stored payload, kept for logging
    pub event_json: String,
    pub outcome: BackupOutcome,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::events;
    use chrono::TimeZone;

    #[test]
    fn test_destination_layout() {
        let instant = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let coordinates = PartitionCoordinates::from_instant(instant);
        let source = BlobAddress::new("container", "dir/file.bin");

        let info = DestinationBlobInfo::for_source(&coordinates, &source, SYNC_COPY_REFERENCE);
        assert_eq!(info.container_name, "2023");
        assert_eq!(info.blob_name, "wk11/dy3/container/dir/file.bin");
        assert_eq!(info.original_address(), source);
        assert!(info.is_direct_transfer());
    }

    #[test]
    fn test_record_keys() {
        let instant = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let event = events::created("aa-bb-cc", instant, "container", "file.bin");
        let record = LogRecord::new(event, None).unwrap();

        assert_eq!(record.partition_key, "2023_11");
        assert_eq!(record.row_key, "0638144712000000000_aabbcc");
    }

    #[test]
    fn test_malformed_event_is_not_loggable() {
        let event = BlobEvent::decode(r#"{"eventType":"Other","id":"x","eventTime":"2023-03-15T10:00:00Z"}"#);
        assert!(matches!(
            LogRecord::new(event, None),
            Err(RecordError::Unloggable(_))
        ));
    }

    #[test]
    fn test_stored_round_trip_outcomes() {
        let instant = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let created = events::created("1", instant, "c", "b");
        let deleted = events::deleted("2", instant, "c", "b");
        let coordinates = PartitionCoordinates::from_instant(instant);
        let info = DestinationBlobInfo::for_source(
            &coordinates,
            &BlobAddress::new("c", "b"),
            SYNC_COPY_REFERENCE,
        );

        let copied = LogRecord::new(created.clone(), Some(info.clone()))
            .unwrap()
            .to_stored()
            .unwrap()
            .into_entry();
        assert_eq!(copied.outcome, BackupOutcome::Copied(info));
        assert_eq!(copied.event, created);

        let missing = LogRecord::new(created, None)
            .unwrap()
            .to_stored()
            .unwrap()
            .into_entry();
        assert_eq!(missing.outcome, BackupOutcome::SourceMissing);

        let logged = LogRecord::new(deleted, None)
            .unwrap()
            .to_stored()
            .unwrap()
            .into_entry();
        assert_eq!(logged.outcome, BackupOutcome::NotApplicable);
    }

    #[test]
    fn test_unreadable_destination() {
        let instant = Utc.with_ymd_and_hms(2023, 3, 15, 10, 0, 0).unwrap();
        let mut stored = LogRecord::new(events::created("1", instant, "c", "b"), None)
            .unwrap()
            .to_stored()
            .unwrap();
        stored.destination_json = Some("{not json".to_string());

        assert!(matches!(
            stored.into_entry().outcome,
            BackupOutcome::Unreadable(_)
        ));
    }
}
