//! Blob change events and their wire codec.
//!
//! Events arrive as Event Grid style JSON documents. Decoding reads the
//!  generic `eventType` field first and then dispatches to the typed
//!  payload for creations and deletions. Anything else decodes to
//!  [`BlobEvent::Malformed`] so callers can log and skip without aborting.

mod address;
mod data;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use address::{AddressError, BlobAddress};
pub use data::{CreatedEventData, DeletedEventData};

use crate::partition::PartitionCoordinates;

pub const BLOB_CREATED: &str = "BlobCreated";
pub const BLOB_DELETED: &str = "BlobDeleted";

/// Namespace prefix used by fully qualified storage event types,
///  e.g. `Microsoft.Storage.BlobCreated`.
const EVENT_TYPE_NAMESPACE: &str = "Microsoft.Storage.";

#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    #[error("cannot serialize malformed event: {0}")]
    Malformed(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope shared by every event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub event_type: String,
    pub event_time: DateTime<Utc>,
    pub id: String,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Deleted,
}

impl EventKind {
    /// Match an event type name, case-insensitively, with or without the
    ///  storage namespace prefix.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        let name = event_type.trim();
        let name = match name.get(..EVENT_TYPE_NAMESPACE.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(EVENT_TYPE_NAMESPACE) => {
                &name[EVENT_TYPE_NAMESPACE.len()..]
            }
            _ => name,
        };

        if name.eq_ignore_ascii_case(BLOB_CREATED) {
            Some(EventKind::Created)
        } else if name.eq_ignore_ascii_case(BLOB_DELETED) {
            Some(EventKind::Deleted)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => BLOB_CREATED,
            EventKind::Deleted => BLOB_DELETED,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event we could not (or would not) decode. Whatever identity could
///  be recovered from the envelope is kept for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedEvent {
    pub id: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
    pub event_type: Option<String>,
    pub reason: String,
}

pub type CreatedEvent = EventEnvelope<CreatedEventData>;
pub type DeletedEvent = EventEnvelope<DeletedEventData>;

#[derive(Debug, Clone, PartialEq)]
pub enum BlobEvent {
    Created(CreatedEvent),
    Deleted(DeletedEvent),
    Malformed(MalformedEvent),
}

impl BlobEvent {
    /// Decode a raw event payload. Never fails: undecodable input becomes
    ///  [`BlobEvent::Malformed`].
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return BlobEvent::Malformed(MalformedEvent {
                    id: None,
                    event_time: None,
                    event_type: None,
                    reason: format!("invalid json: {}", e),
                })
            }
        };

        let id = value.get("id").and_then(Value::as_str).map(str::to_string);
        let event_time = value
            .get("eventTime")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        let event_type = value
            .get("eventType")
            .and_then(Value::as_str)
            .map(str::to_string);

        let malformed = |reason: String| {
            BlobEvent::Malformed(MalformedEvent {
                id: id.clone(),
                event_time,
                event_type: event_type.clone(),
                reason,
            })
        };

        let Some(name) = event_type.as_deref() else {
            return malformed("missing eventType".to_string());
        };

        match EventKind::from_event_type(name) {
            Some(EventKind::Created) => match serde_json::from_value(value) {
                Ok(event) => BlobEvent::Created(event),
                Err(e) => malformed(format!("invalid {} payload: {}", BLOB_CREATED, e)),
            },
            Some(EventKind::Deleted) => match serde_json::from_value(value) {
                Ok(event) => BlobEvent::Deleted(event),
                Err(e) => malformed(format!("invalid {} payload: {}", BLOB_DELETED, e)),
            },
            None => malformed(format!("unsupported event type '{}'", name)),
        }
    }

    /// Serialize for storage in the event log.
    pub fn to_json(&self) -> Result<String, EventCodecError> {
        match self {
            BlobEvent::Created(event) => Ok(serde_json::to_string(event)?),
            BlobEvent::Deleted(event) => Ok(serde_json::to_string(event)?),
            BlobEvent::Malformed(event) => Err(EventCodecError::Malformed(event.reason.clone())),
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self {
            BlobEvent::Created(_) => Some(EventKind::Created),
            BlobEvent::Deleted(_) => Some(EventKind::Deleted),
            BlobEvent::Malformed(_) => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            BlobEvent::Created(event) => Some(&event.id),
            BlobEvent::Deleted(event) => Some(&event.id),
            BlobEvent::Malformed(event) => event.id.as_deref(),
        }
    }

    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        match self {
            BlobEvent::Created(event) => Some(event.event_time),
            BlobEvent::Deleted(event) => Some(event.event_time),
            BlobEvent::Malformed(event) => event.event_time,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            BlobEvent::Created(event) => Some(&event.data.url),
            BlobEvent::Deleted(event) => Some(&event.data.url),
            BlobEvent::Malformed(_) => None,
        }
    }

    pub fn coordinates(&self) -> Option<PartitionCoordinates> {
        self.event_time().map(PartitionCoordinates::from_instant)
    }
}
