//! Typed event builders.

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::event::{BlobEvent, CreatedEventData, DeletedEventData, EventEnvelope};

pub const SOURCE_HOST: &str = "https://source.blob.core.windows.net";
pub const SOURCE_TOPIC: &str =
    "/subscriptions/test/resourceGroups/test/providers/Microsoft.Storage/storageAccounts/source";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Url of a blob in the source account. `/` in the blob name is kept as a
///  path separator, everything else unsafe is escaped.
pub fn source_url(container: &str, blob: &str) -> String {
    format!(
        "{}/{}/{}",
        SOURCE_HOST,
        utf8_percent_encode(container, PATH_SEGMENT),
        utf8_percent_encode(blob, PATH_SEGMENT)
    )
}

pub fn subject(container: &str, blob: &str) -> String {
    format!("/blobServices/default/containers/{}/blobs/{}", container, blob)
}

pub fn created(id: &str, time: DateTime<Utc>, container: &str, blob: &str) -> BlobEvent {
    BlobEvent::Created(EventEnvelope {
        topic: Some(SOURCE_TOPIC.to_string()),
        subject: Some(subject(container, blob)),
        event_type: "Microsoft.Storage.BlobCreated".to_string(),
        event_time: time,
        id: id.to_string(),
        data: CreatedEventData {
            api: Some("PutBlob".to_string()),
            client_request_id: None,
            request_id: None,
            e_tag: None,
            content_type: Some("application/octet-stream".to_string()),
            content_length: None,
            blob_type: Some("BlockBlob".to_string()),
            url: source_url(container, blob),
            sequencer: None,
            storage_diagnostics: None,
        },
        data_version: Some(String::new()),
        metadata_version: Some("1".to_string()),
    })
}

pub fn deleted(id: &str, time: DateTime<Utc>, container: &str, blob: &str) -> BlobEvent {
    BlobEvent::Deleted(EventEnvelope {
        topic: Some(SOURCE_TOPIC.to_string()),
        subject: Some(subject(container, blob)),
        event_type: "Microsoft.Storage.BlobDeleted".to_string(),
        event_time: time,
        id: id.to_string(),
        data: DeletedEventData {
            api: Some("DeleteBlob".to_string()),
            request_id: None,
            content_type: None,
            blob_type: Some("BlockBlob".to_string()),
            url: source_url(container, blob),
            sequencer: None,
            storage_diagnostics: None,
        },
        data_version: Some(String::new()),
        metadata_version: Some("1".to_string()),
    })
}
