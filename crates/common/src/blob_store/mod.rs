//! Blob storage accounts as seen by the copy engine.
//!
//! A [`BlobStore`] is one storage account: containers holding named blobs.
//!  The backup path reads from a source account and writes into a backup
//!  account; restore reads the backup account and writes a restore account.

mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use url::Url;

pub use memory::{MemoryBlobCloud, MemoryBlobStore};

use crate::event::BlobAddress;

/// Blob content as a stream of chunks.
pub type BlobStream = BoxStream<'static, Result<Bytes, BlobStoreError>>;

#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("blob not found: {0}")]
    BlobNotFound(BlobAddress),
    #[error("invalid blob name '{0}': {1}")]
    InvalidName(String, String),
    #[error("read grant rejected: {0}")]
    GrantRejected(String),
    #[error("{account} does not support {operation}")]
    Unsupported {
        account: String,
        operation: &'static str,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub length: u64,
    pub content_type: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Short lived read access to one blob, usable by another account to
///  pull the blob's bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadGrant {
    pub source: BlobAddress,
    /// Source url with the grant attached
    pub url: Url,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

#[async_trait]
pub trait BlobStore: Send + Sync + Debug {
    /// Human readable account name, used in logs.
    fn account(&self) -> &str;

    async fn container_exists(&self, container: &str) -> Result<bool, BlobStoreError>;

    /// Create a container if it is missing. Returns whether it was created.
    async fn ensure_container(&self, container: &str) -> Result<bool, BlobStoreError>;

    /// Blob metadata, `None` if the blob (or its container) does not exist.
    async fn properties(
        &self,
        blob: &BlobAddress,
    ) -> Result<Option<BlobProperties>, BlobStoreError>;

    async fn exists(&self, blob: &BlobAddress) -> Result<bool, BlobStoreError> {
        Ok(self.properties(blob).await?.is_some())
    }

    async fn length(&self, blob: &BlobAddress) -> Result<u64, BlobStoreError> {
        self.properties(blob)
            .await?
            .map(|properties| properties.length)
            .ok_or_else(|| BlobStoreError::BlobNotFound(blob.clone()))
    }

    async fn read(&self, blob: &BlobAddress) -> Result<BlobStream, BlobStoreError>;

    /// Write (or overwrite) a blob from a stream. The container must exist.
    ///  Returns the number of bytes written.
    async fn write(&self, blob: &BlobAddress, data: BlobStream) -> Result<u64, BlobStoreError>;

    /// Returns whether a blob was actually deleted.
    async fn delete_if_exists(&self, blob: &BlobAddress) -> Result<bool, BlobStoreError>;

    /// Mint a read-only grant on a blob valid for `[valid_from, valid_to]`.
    async fn mint_read_grant(
        &self,
        blob: &BlobAddress,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<ReadGrant, BlobStoreError>;

    /// Schedule a copy of the granted source blob into `destination` on
    ///  this account. Returns the copy operation id once the copy is
    ///  scheduled; completion is not awaited.
    async fn begin_server_copy(
        &self,
        destination: &BlobAddress,
        source: &ReadGrant,
    ) -> Result<String, BlobStoreError>;
}

/// Stream a blob from one account into another through this process.
pub async fn stream_copy(
    source: &dyn BlobStore,
    from: &BlobAddress,
    destination: &dyn BlobStore,
    to: &BlobAddress,
) -> Result<u64, BlobStoreError> {
    let data = source.read(from).await?;
    destination.write(to, data).await
}
