/// Lightweight harness for backup and restore integration tests
///
/// Wires in-memory source, backup and restore accounts, an in-memory
/// queue and an in-memory event log together, so the full
/// queue -> backup -> log -> restore path can run in-process.
///
/// # Example
///
/// ```rust,ignore
/// use common::testkit::{payloads, TestEnv};
///
/// #[tokio::test]
/// async fn test_backup_then_restore() {
///     let env = TestEnv::new();
///     env.put_source("photos", "cat.png", b"meow");
///     env.queue.enqueue(&payloads::created("1", now, "photos", "cat.png")).await.unwrap();
///
///     env.backup_worker().run_once(&env.shutdown).await.unwrap();
///     let summary = env.restore_worker().run(&window).await;
///     assert_eq!(summary.restored, 1);
/// }
/// ```
mod env;
pub mod events;
mod failing;

pub use env::TestEnv;
pub use failing::{FailingEventLogProvider, InjectedFailure};

/// Builders for raw queue payloads, shaped like the JSON the event
/// subscription delivers.
pub mod payloads {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde_json::json;

    use super::events::{self, source_url, subject};

    pub fn created(id: &str, time: DateTime<Utc>, container: &str, blob: &str) -> String {
        json!({
            "topic": events::SOURCE_TOPIC,
            "subject": subject(container, blob),
            "eventType": "Microsoft.Storage.BlobCreated",
            "eventTime": time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            "id": id,
            "data": {
                "api": "PutBlob",
                "contentType": "application/octet-stream",
                "blobType": "BlockBlob",
                "url": source_url(container, blob),
            },
            "dataVersion": "",
            "metadataVersion": "1",
        })
        .to_string()
    }

    pub fn deleted(id: &str, time: DateTime<Utc>, container: &str, blob: &str) -> String {
        json!({
            "topic": events::SOURCE_TOPIC,
            "subject": subject(container, blob),
            "eventType": "Microsoft.Storage.BlobDeleted",
            "eventTime": time.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            "id": id,
            "data": {
                "api": "DeleteBlob",
                "blobType": "BlockBlob",
                "url": source_url(container, blob),
            },
            "dataVersion": "",
            "metadataVersion": "1",
        })
        .to_string()
    }
}
