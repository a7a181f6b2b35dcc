//! Object storage accounts for blob-backup
//!
//! This crate provides a [`common::blob_store::BlobStore`] implementation
//! over pluggable object storage (S3/MinIO/local filesystem/memory). Each
//! configured account maps containers to top-level prefixes of one store.
//!
//! # Features
//!
//! - Streaming multipart writes, so blobs never have to fit in memory
//! - Read grants: presigned GET urls on S3, `file://` urls on local disk
//! - Server copies that pull a granted url in the background and report
//!   an operation id immediately
//!
//! # Example
//!
//! ```rust,no_run
//! use blob_backup_object_store::{AccountConfig, ObjectBlobStore};
//! use common::blob_store::BlobStore;
//! use std::path::PathBuf;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backup = ObjectBlobStore::new(
//!     "backup",
//!     AccountConfig::Local { path: PathBuf::from("/tmp/backup") },
//! )
//! .await?;
//! backup.ensure_container("2023").await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod storage;
mod transfer;

pub use error::{ObjectBlobStoreError, Result};
pub use storage::{AccountConfig, ObjectBlobStore, CONTAINER_MARKER};
pub use transfer::CopyStatus;
