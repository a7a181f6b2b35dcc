//! Error types for object storage accounts.

use common::blob_store::BlobStoreError;

/// Errors that can occur when working with an object storage account.
#[derive(Debug, thiserror::Error)]
pub enum ObjectBlobStoreError {
    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error while fetching a copy source
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Copy source url this account cannot fetch
    #[error("unsupported copy source: {0}")]
    UnsupportedSource(String),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before starting the service.")]
    BucketNotFound(String),
}

impl From<ObjectBlobStoreError> for BlobStoreError {
    fn from(e: ObjectBlobStoreError) -> Self {
        match e {
            ObjectBlobStoreError::Io(e) => BlobStoreError::Io(e),
            other => BlobStoreError::Backend(other.to_string()),
        }
    }
}

/// Result type alias for object storage operations.
pub type Result<T> = std::result::Result<T, ObjectBlobStoreError>;
