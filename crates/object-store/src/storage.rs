//! Storage accounts over object storage (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::blob_store::{BlobProperties, BlobStore, BlobStoreError, BlobStream, ReadGrant};
use common::event::BlobAddress;
use futures::{StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ObjectBlobStoreError, Result};
use crate::transfer::{fetch_into, write_stream, CopyStatus, CopyTracker};

/// Name of the marker object that makes a prefix a container.
pub const CONTAINER_MARKER: &str = ".container";

/// Configuration for one storage account.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// What the account can do beyond plain object access.
#[derive(Debug, Clone)]
enum Backend {
    Memory,
    Local { root: PathBuf },
    S3 { signer: Arc<AmazonS3> },
}

/// A storage account whose containers are top-level prefixes of an
///  object store.
#[derive(Debug, Clone)]
pub struct ObjectBlobStore {
    name: String,
    inner: Arc<dyn ObjectStore>,
    backend: Backend,
    copies: CopyTracker,
    http: reqwest::Client,
}

/// Fail fast when the configured bucket does not exist.
async fn verify_bucket(store: &dyn ObjectStore, bucket: &str) -> Result<()> {
    let prefix = ObjectPath::from("");
    let mut listing = store.list(Some(&prefix));
    match listing.try_next().await {
        Ok(_) => Ok(()),
        Err(object_store::Error::NotFound { .. }) => {
            Err(ObjectBlobStoreError::BucketNotFound(bucket.to_string()))
        }
        Err(e) if e.to_string().contains("NoSuchBucket") => {
            Err(ObjectBlobStoreError::BucketNotFound(bucket.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

impl ObjectBlobStore {
    /// Create a new account from configuration.
    pub async fn new(name: impl Into<String>, config: AccountConfig) -> Result<Self> {
        let name = name.into();
        let (inner, backend): (Arc<dyn ObjectStore>, Backend) = match &config {
            AccountConfig::Memory => {
                let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
                (store, Backend::Memory)
            }

            AccountConfig::Local { path } => {
                // Ensure directory exists
                tokio::fs::create_dir_all(path).await?;
                let root = tokio::fs::canonicalize(path).await?;
                let store: Arc<dyn ObjectStore> = Arc::new(
                    LocalFileSystem::new_with_prefix(&root)
                        .map_err(|e| ObjectBlobStoreError::InvalidConfig(e.to_string()))?,
                );
                (store, Backend::Local { root })
            }

            AccountConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store = Arc::new(
                    builder
                        .build()
                        .map_err(|e| ObjectBlobStoreError::InvalidConfig(e.to_string()))?,
                );

                verify_bucket(store.as_ref(), bucket).await?;

                let inner: Arc<dyn ObjectStore> = store.clone();
                (inner, Backend::S3 { signer: store })
            }
        };

        info!(account = %name, backend = backend.kind(), "opened storage account");
        Ok(Self {
            name,
            inner,
            backend,
            copies: CopyTracker::default(),
            http: reqwest::Client::new(),
        })
    }

    /// Create an in-memory account.
    pub fn memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(InMemory::new()),
            backend: Backend::Memory,
            copies: CopyTracker::default(),
            http: reqwest::Client::new(),
        }
    }

    /// Status of a server copy scheduled against this account.
    pub fn copy_status(&self, copy_id: &str) -> Option<CopyStatus> {
        self.copies.status(copy_id)
    }

    /// Blob names in a container, sorted.
    pub async fn list_blobs(&self, container: &str) -> Result<Vec<String>> {
        let prefix = container_path(container).map_err(ObjectBlobStoreError::InvalidConfig)?;
        let items: Vec<_> = self.inner.list(Some(&prefix)).try_collect().await?;

        let mut names: Vec<String> = items
            .into_iter()
            .filter_map(|meta| {
                let parts: Vec<String> = meta
                    .location
                    .prefix_match(&prefix)?
                    .map(|part| part.as_ref().to_string())
                    .collect();
                let name = parts.join("/");
                (name != CONTAINER_MARKER).then_some(name)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn blob_path(&self, blob: &BlobAddress) -> std::result::Result<ObjectPath, BlobStoreError> {
        let invalid = |reason: &str| BlobStoreError::InvalidName(blob.to_string(), reason.to_string());
        validate_container(&blob.container).map_err(|reason| invalid(&reason))?;
        if blob.blob.split('/').all(str::is_empty) {
            return Err(invalid("empty blob name"));
        }
        if blob.blob == CONTAINER_MARKER {
            return Err(invalid("name is reserved"));
        }

        Ok(ObjectPath::from_iter(
            std::iter::once(blob.container.as_str()).chain(blob.blob.split('/')),
        ))
    }

    async fn head(&self, path: &ObjectPath) -> Result<Option<object_store::ObjectMeta>> {
        match self.inner.head(path).await {
            Ok(meta) => Ok(Some(meta)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Backend {
    fn kind(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Local { .. } => "local",
            Backend::S3 { .. } => "s3",
        }
    }
}

fn validate_container(container: &str) -> std::result::Result<(), String> {
    if container.is_empty() {
        return Err("empty container name".to_string());
    }
    if container.contains('/') {
        return Err("container names cannot contain '/'".to_string());
    }
    Ok(())
}

fn container_path(container: &str) -> std::result::Result<ObjectPath, String> {
    validate_container(container)?;
    Ok(ObjectPath::from_iter([container]))
}

fn marker_path(container: &str) -> std::result::Result<ObjectPath, BlobStoreError> {
    let prefix = container_path(container)
        .map_err(|reason| BlobStoreError::InvalidName(container.to_string(), reason))?;
    Ok(prefix.child(CONTAINER_MARKER))
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn account(&self) -> &str {
        &self.name
    }

    async fn container_exists(&self, container: &str) -> std::result::Result<bool, BlobStoreError> {
        Ok(self.head(&marker_path(container)?).await?.is_some())
    }

    async fn ensure_container(&self, container: &str) -> std::result::Result<bool, BlobStoreError> {
        let marker = marker_path(container)?;
        if self.head(&marker).await?.is_some() {
            return Ok(false);
        }
        self.inner
            .put(&marker, bytes::Bytes::new().into())
            .await
            .map_err(ObjectBlobStoreError::from)?;
        debug!(account = %self.name, container = %container, "created container");
        Ok(true)
    }

    async fn properties(
        &self,
        blob: &BlobAddress,
    ) -> std::result::Result<Option<BlobProperties>, BlobStoreError> {
        let path = self.blob_path(blob)?;
        Ok(self.head(&path).await?.map(|meta| BlobProperties {
            length: meta.size as u64,
            content_type: None,
            last_modified: Some(meta.last_modified),
        }))
    }

    async fn read(&self, blob: &BlobAddress) -> std::result::Result<BlobStream, BlobStoreError> {
        let path = self.blob_path(blob)?;
        let result = match self.inner.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(BlobStoreError::BlobNotFound(blob.clone()))
            }
            Err(e) => return Err(ObjectBlobStoreError::from(e).into()),
        };

        Ok(result
            .into_stream()
            .map_err(|e| BlobStoreError::from(ObjectBlobStoreError::from(e)))
            .boxed())
    }

    async fn write(
        &self,
        blob: &BlobAddress,
        data: BlobStream,
    ) -> std::result::Result<u64, BlobStoreError> {
        let path = self.blob_path(blob)?;
        if !self.container_exists(&blob.container).await? {
            return Err(BlobStoreError::ContainerNotFound(blob.container.clone()));
        }
        write_stream(self.inner.as_ref(), &path, data).await
    }

    async fn delete_if_exists(&self, blob: &BlobAddress) -> std::result::Result<bool, BlobStoreError> {
        let path = self.blob_path(blob)?;
        if self.head(&path).await?.is_none() {
            return Ok(false);
        }
        // Ignore NotFound errors - the blob may already be deleted
        match self.inner.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(ObjectBlobStoreError::from(e).into()),
        }
    }

    async fn mint_read_grant(
        &self,
        blob: &BlobAddress,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> std::result::Result<ReadGrant, BlobStoreError> {
        let path = self.blob_path(blob)?;
        if self.head(&path).await?.is_none() {
            return Err(BlobStoreError::BlobNotFound(blob.clone()));
        }

        let url = match &self.backend {
            Backend::Memory => {
                return Err(BlobStoreError::Unsupported {
                    account: self.name.clone(),
                    operation: "read grants",
                })
            }
            // Local files are readable by path; the window is checked when
            //  the copy is scheduled.
            Backend::Local { root } => {
                let file = root.join(path.as_ref());
                Url::from_file_path(&file).map_err(|_| {
                    BlobStoreError::InvalidName(blob.to_string(), "not an absolute path".to_string())
                })?
            }
            // S3 presigned urls have no start time, only an expiry.
            Backend::S3 { signer } => {
                let expires_in = (valid_to - Utc::now()).to_std().map_err(|_| {
                    BlobStoreError::GrantRejected("grant expiry is in the past".to_string())
                })?;
                signer
                    .signed_url(http::Method::GET, &path, expires_in)
                    .await
                    .map_err(ObjectBlobStoreError::from)?
            }
        };

        Ok(ReadGrant {
            source: blob.clone(),
            url,
            valid_from,
            valid_to,
        })
    }

    async fn begin_server_copy(
        &self,
        destination: &BlobAddress,
        source: &ReadGrant,
    ) -> std::result::Result<String, BlobStoreError> {
        let now = Utc::now();
        if now < source.valid_from || now > source.valid_to {
            return Err(BlobStoreError::GrantRejected(
                "grant is outside its validity window".to_string(),
            ));
        }

        let path = self.blob_path(destination)?;
        if !self.container_exists(&destination.container).await? {
            return Err(BlobStoreError::ContainerNotFound(
                destination.container.clone(),
            ));
        }

        let copy_id = self.copies.start();
        let copies = self.copies.clone();
        let store = self.inner.clone();
        let client = self.http.clone();
        let url = source.url.clone();
        let task_id = copy_id.clone();
        let account = self.name.clone();

        tokio::spawn(async move {
            match fetch_into(store, path.clone(), url, client).await {
                Ok(bytes) => {
                    debug!(account = %account, copy_id = %task_id, path = %path, bytes = bytes, "server copy finished");
                    copies.finish(&task_id, CopyStatus::Success { bytes });
                }
                Err(e) => {
                    warn!(account = %account, copy_id = %task_id, path = %path, "server copy failed: {}", e);
                    copies.finish(&task_id, CopyStatus::Failed(e.to_string()));
                }
            }
        });

        debug!(
            account = %self.name,
            copy_id = %copy_id,
            destination = %destination,
            "scheduled server copy"
        );
        Ok(copy_id)
    }
}
