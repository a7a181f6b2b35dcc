//! Streaming writes and background server copies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use common::blob_store::BlobStoreError;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt, TryStreamExt};
use object_store::path::Path as ObjectPath;
use object_store::{MultipartUpload, ObjectStore, PutPayloadMut, UploadPart};
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use url::Url;
use uuid::Uuid;

use crate::error::ObjectBlobStoreError;

/// Size of each read when pulling a local file.
const READ_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Size of each uploaded part. S3 rejects non-final parts under 5 MiB.
const PART_SIZE: usize = 5 * 1024 * 1024;

/// Parts allowed in flight during a multipart upload.
const MAX_CONCURRENT_PARTS: usize = 4;

/// How long a finished copy stays queryable.
const FINISHED_RETENTION: Duration = Duration::from_secs(60 * 60);

/// State of a scheduled server copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyStatus {
    Pending,
    Success { bytes: u64 },
    Failed(String),
}

#[derive(Debug)]
struct CopyEntry {
    status: CopyStatus,
    finished_at: Option<Instant>,
}

/// Tracks server copies scheduled against one account. Finished copies
///  are dropped once they are older than the retention window.
#[derive(Debug, Clone)]
pub(crate) struct CopyTracker {
    copies: Arc<Mutex<HashMap<String, CopyEntry>>>,
    retention: Duration,
}

impl Default for CopyTracker {
    fn default() -> Self {
        Self::with_retention(FINISHED_RETENTION)
    }
}

impl CopyTracker {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            copies: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    pub fn start(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let mut copies = self.copies.lock();
        self.evict_expired(&mut copies);
        copies.insert(
            id.clone(),
            CopyEntry {
                status: CopyStatus::Pending,
                finished_at: None,
            },
        );
        id
    }

    pub fn finish(&self, id: &str, status: CopyStatus) {
        let mut copies = self.copies.lock();
        self.evict_expired(&mut copies);
        copies.insert(
            id.to_string(),
            CopyEntry {
                status,
                finished_at: Some(Instant::now()),
            },
        );
    }

    pub fn status(&self, id: &str) -> Option<CopyStatus> {
        self.copies.lock().get(id).map(|entry| entry.status.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.copies.lock().len()
    }

    fn evict_expired(&self, copies: &mut HashMap<String, CopyEntry>) {
        copies.retain(|_, entry| match entry.finished_at {
            Some(at) => at.elapsed() < self.retention,
            None => true,
        });
    }
}

/// Write a byte stream to `path` with a multipart upload.
pub(crate) async fn write_stream<S, E>(
    store: &dyn ObjectStore,
    path: &ObjectPath,
    data: S,
) -> Result<u64, BlobStoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BlobStoreError>,
{
    let upload = store
        .put_multipart(path)
        .await
        .map_err(ObjectBlobStoreError::from)?;
    finish_upload(upload, path, data).await
}

/// Drive `upload` to completion. Any failure after the upload was
///  created aborts it.
async fn finish_upload<S, E>(
    mut upload: Box<dyn MultipartUpload>,
    path: &ObjectPath,
    data: S,
) -> Result<u64, BlobStoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BlobStoreError>,
{
    let result: Result<u64, BlobStoreError> = match upload_parts(&mut *upload, data).await {
        Ok(written) => match upload.complete().await {
            Ok(_) => Ok(written),
            Err(e) => Err(ObjectBlobStoreError::from(e).into()),
        },
        Err(e) => Err(e),
    };

    if result.is_err() {
        if let Err(abort) = upload.abort().await {
            tracing::warn!(path = %path, "failed to abort multipart upload: {}", abort);
        }
    }
    result
}

async fn upload_parts<S, E>(
    upload: &mut dyn MultipartUpload,
    mut data: S,
) -> Result<u64, BlobStoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<BlobStoreError>,
{
    let mut in_flight: FuturesUnordered<UploadPart> = FuturesUnordered::new();
    let mut buffer = PutPayloadMut::new();
    let mut written = 0u64;

    while let Some(chunk) = data.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Err(e.into()),
        };
        written += chunk.len() as u64;
        buffer.push(chunk);

        if buffer.content_length() >= PART_SIZE {
            while in_flight.len() >= MAX_CONCURRENT_PARTS {
                in_flight
                    .try_next()
                    .await
                    .map_err(ObjectBlobStoreError::from)?;
            }
            let part = std::mem::take(&mut buffer);
            in_flight.push(upload.put_part(part.freeze()));
        }
    }

    if !buffer.is_empty() {
        in_flight.push(upload.put_part(buffer.freeze()));
    }
    while let Some(part) = in_flight.next().await {
        part.map_err(ObjectBlobStoreError::from)?;
    }

    Ok(written)
}

/// Pull `source` into `destination`. `file://` urls are read from disk,
///  `http(s)://` urls are fetched.
pub(crate) async fn fetch_into(
    store: Arc<dyn ObjectStore>,
    destination: ObjectPath,
    source: Url,
    client: reqwest::Client,
) -> Result<u64, BlobStoreError> {
    match source.scheme() {
        "file" => {
            let path = source
                .to_file_path()
                .map_err(|_| ObjectBlobStoreError::UnsupportedSource(source.to_string()))?;
            let file = tokio::fs::File::open(&path).await?;
            let chunks = futures::stream::try_unfold(file, |mut file| async move {
                let mut buffer = vec![0u8; READ_CHUNK_SIZE];
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    return Ok(None);
                }
                buffer.truncate(read);
                Ok::<_, std::io::Error>(Some((Bytes::from(buffer), file)))
            });
            write_stream(store.as_ref(), &destination, Box::pin(chunks)).await
        }
        "http" | "https" => {
            let response = client
                .get(source)
                .send()
                .await
                .and_then(|response| response.error_for_status())
                .map_err(ObjectBlobStoreError::from)?;
            let chunks = response.bytes_stream().map_err(ObjectBlobStoreError::from);
            write_stream(store.as_ref(), &destination, Box::pin(chunks)).await
        }
        _ => Err(ObjectBlobStoreError::UnsupportedSource(source.to_string()).into()),
    }
}
