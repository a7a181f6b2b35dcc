use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use url::Url;
use uuid::Uuid;

use super::{BlobProperties, BlobStore, BlobStoreError, BlobStream, ReadGrant};
use crate::event::BlobAddress;

const GRANT_PARAM: &str = "grant";
const SCHEME: &str = "memory";

/// A set of in-memory storage accounts that can reach each other.
///
/// Server copies resolve the source account from the grant url host, so
///  accounts taking part in one copy must come from the same cloud.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobCloud {
    accounts: Arc<Mutex<HashMap<String, Arc<Mutex<AccountState>>>>>,
}

impl MemoryBlobCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the account called `name`.
    pub fn account(&self, name: &str) -> MemoryBlobStore {
        let state = self
            .accounts
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();

        MemoryBlobStore {
            name: name.to_string(),
            cloud: self.clone(),
            state,
        }
    }

    fn lookup(&self, name: &str) -> Option<Arc<Mutex<AccountState>>> {
        self.accounts.lock().get(name).cloned()
    }
}

#[derive(Debug, Default)]
struct AccountState {
    containers: BTreeMap<String, BTreeMap<String, MemoryBlob>>,
    grants: HashMap<String, GrantRecord>,
    copies: Vec<String>,
    failing: HashSet<BlobAddress>,
}

#[derive(Debug, Clone)]
struct MemoryBlob {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct GrantRecord {
    blob: BlobAddress,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
}

/// One in-memory storage account.
#[derive(Debug, Clone)]
pub struct MemoryBlobStore {
    name: String,
    cloud: MemoryBlobCloud,
    state: Arc<Mutex<AccountState>>,
}

impl MemoryBlobStore {
    /// Store a blob directly, creating its container.
    pub fn put_blob(&self, address: &BlobAddress, data: Bytes) {
        self.state
            .lock()
            .containers
            .entry(address.container.clone())
            .or_default()
            .insert(
                address.blob.clone(),
                MemoryBlob {
                    data,
                    last_modified: Utc::now(),
                },
            );
    }

    pub fn blob_bytes(&self, address: &BlobAddress) -> Option<Bytes> {
        self.state
            .lock()
            .containers
            .get(&address.container)
            .and_then(|blobs| blobs.get(&address.blob))
            .map(|blob| blob.data.clone())
    }

    /// Blob names in a container, sorted.
    pub fn list_blobs(&self, container: &str) -> Vec<String> {
        self.state
            .lock()
            .containers
            .get(container)
            .map(|blobs| blobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn containers(&self) -> Vec<String> {
        self.state.lock().containers.keys().cloned().collect()
    }

    /// Ids of server copies scheduled into this account.
    pub fn server_copies(&self) -> Vec<String> {
        self.state.lock().copies.clone()
    }

    /// Make every operation touching `address` fail with a backend error.
    pub fn fail_on(&self, address: BlobAddress) {
        self.state.lock().failing.insert(address);
    }

    fn check_failure(&self, address: &BlobAddress) -> Result<(), BlobStoreError> {
        if self.state.lock().failing.contains(address) {
            return Err(BlobStoreError::Backend(format!(
                "injected failure for {} in {}",
                address, self.name
            )));
        }
        Ok(())
    }

    fn grant_url(&self, address: &BlobAddress, token: &str) -> Result<Url, BlobStoreError> {
        let invalid = |reason: String| BlobStoreError::InvalidName(address.to_string(), reason);

        let mut url = Url::parse(&format!("{}://{}/", SCHEME, self.name))
            .map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| invalid("account url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(&address.container)
            .extend(address.blob.split('/'));
        url.query_pairs_mut().append_pair(GRANT_PARAM, token);
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn account(&self) -> &str {
        &self.name
    }

    async fn container_exists(&self, container: &str) -> Result<bool, BlobStoreError> {
        Ok(self.state.lock().containers.contains_key(container))
    }

    async fn ensure_container(&self, container: &str) -> Result<bool, BlobStoreError> {
        let mut state = self.state.lock();
        if state.containers.contains_key(container) {
            return Ok(false);
        }
        state
            .containers
            .insert(container.to_string(), BTreeMap::new());
        Ok(true)
    }

    async fn properties(
        &self,
        blob: &BlobAddress,
    ) -> Result<Option<BlobProperties>, BlobStoreError> {
        self.check_failure(blob)?;
        let state = self.state.lock();
        Ok(state
            .containers
            .get(&blob.container)
            .and_then(|blobs| blobs.get(&blob.blob))
            .map(|stored| BlobProperties {
                length: stored.data.len() as u64,
                content_type: None,
                last_modified: Some(stored.last_modified),
            }))
    }

    async fn read(&self, blob: &BlobAddress) -> Result<BlobStream, BlobStoreError> {
        self.check_failure(blob)?;
        let data = self
            .blob_bytes(blob)
            .ok_or_else(|| BlobStoreError::BlobNotFound(blob.clone()))?;
        Ok(stream::iter([Ok(data)]).boxed())
    }

    async fn write(
        &self,
        blob: &BlobAddress,
        mut data: BlobStream,
    ) -> Result<u64, BlobStoreError> {
        self.check_failure(blob)?;
        if !self.container_exists(&blob.container).await? {
            return Err(BlobStoreError::ContainerNotFound(blob.container.clone()));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let written = buffer.len() as u64;

        let mut state = self.state.lock();
        let blobs = state
            .containers
            .get_mut(&blob.container)
            .ok_or_else(|| BlobStoreError::ContainerNotFound(blob.container.clone()))?;
        blobs.insert(
            blob.blob.clone(),
            MemoryBlob {
                data: buffer.freeze(),
                last_modified: Utc::now(),
            },
        );
        Ok(written)
    }

    async fn delete_if_exists(&self, blob: &BlobAddress) -> Result<bool, BlobStoreError> {
        self.check_failure(blob)?;
        let mut state = self.state.lock();
        Ok(state
            .containers
            .get_mut(&blob.container)
            .and_then(|blobs| blobs.remove(&blob.blob))
            .is_some())
    }

    async fn mint_read_grant(
        &self,
        blob: &BlobAddress,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<ReadGrant, BlobStoreError> {
        self.check_failure(blob)?;
        let token = Uuid::new_v4().simple().to_string();
        let url = self.grant_url(blob, &token)?;

        let now = Utc::now();
        let mut state = self.state.lock();
        state.grants.retain(|_, grant| grant.valid_to >= now);
        state.grants.insert(
            token,
            GrantRecord {
                blob: blob.clone(),
                valid_from,
                valid_to,
            },
        );

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
    ) -> Result<String, BlobStoreError> {
        self.check_failure(destination)?;
        if source.url.scheme() != SCHEME {
            return Err(BlobStoreError::Unsupported {
                account: self.name.clone(),
                operation: "server copy from non-memory urls",
            });
        }

        let rejected = |reason: &str| BlobStoreError::GrantRejected(reason.to_string());
        let account = source
            .url
            .host_str()
            .ok_or_else(|| rejected("grant url has no account"))?;
        let token = source
            .url
            .query_pairs()
            .find(|(key, _)| key == GRANT_PARAM)
            .map(|(_, value)| value.into_owned())
            .ok_or_else(|| rejected("grant url carries no grant"))?;
        let address = BlobAddress::from_url(source.url.as_str())
            .map_err(|e| BlobStoreError::GrantRejected(e.to_string()))?;

        let source_state = self
            .cloud
            .lookup(account)
            .ok_or_else(|| rejected("unknown source account"))?;
        let data = {
            let state = source_state.lock();
            let grant = state
                .grants
                .get(&token)
                .ok_or_else(|| rejected("unknown grant"))?;
            let now = Utc::now();
            if grant.blob != address {
                return Err(rejected("grant was minted for a different blob"));
            }
            if now < grant.valid_from || now > grant.valid_to {
                return Err(rejected("grant is outside its validity window"));
            }
            state
                .containers
                .get(&address.container)
                .and_then(|blobs| blobs.get(&address.blob))
                .map(|blob| blob.data.clone())
                .ok_or_else(|| BlobStoreError::BlobNotFound(address.clone()))?
        };

        let mut state = self.state.lock();
        let blobs = state
            .containers
            .get_mut(&destination.container)
            .ok_or_else(|| BlobStoreError::ContainerNotFound(destination.container.clone()))?;
        blobs.insert(
            destination.blob.clone(),
            MemoryBlob {
                data,
                last_modified: Utc::now(),
            },
        );

        let copy_id = Uuid::new_v4().to_string();
        state.copies.push(copy_id.clone());
        Ok(copy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_container_lifecycle() {
        let store = MemoryBlobCloud::new().account("a");
        assert!(!store.container_exists("c").await.unwrap());
        assert!(store.ensure_container("c").await.unwrap());
        assert!(!store.ensure_container("c").await.unwrap());
        assert!(store.container_exists("c").await.unwrap());
    }

    #[tokio::test]
    async fn test_properties_and_delete() {
        let store = MemoryBlobCloud::new().account("a");
        let address = BlobAddress::new("c", "dir/blob.txt");
        assert!(store.properties(&address).await.unwrap().is_none());

        store.put_blob(&address, Bytes::from_static(b"hello"));
        assert!(store.exists(&address).await.unwrap());
        assert_eq!(store.length(&address).await.unwrap(), 5);

        assert!(store.delete_if_exists(&address).await.unwrap());
        assert!(!store.delete_if_exists(&address).await.unwrap());
        assert!(matches!(
            store.length(&address).await,
            Err(BlobStoreError::BlobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_url_shape() {
        let store = MemoryBlobCloud::new().account("source");
        let address = BlobAddress::new("c", "dir/my blob.txt");
        store.put_blob(&address, Bytes::from_static(b"x"));

        let now = Utc::now();
        let grant = store
            .mint_read_grant(&address, now, now + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(grant.url.scheme(), "memory");
        assert_eq!(grant.url.host_str(), Some("source"));
        assert_eq!(BlobAddress::from_url(grant.url.as_str()).unwrap(), address);
    }

    #[tokio::test]
    async fn test_server_copy_with_valid_grant() {
        let cloud = MemoryBlobCloud::new();
        let source = cloud.account("source");
        let backup = cloud.account("backup");
        let address = BlobAddress::new("c", "blob");
        source.put_blob(&address, Bytes::from_static(b"payload"));

        let now = Utc::now();
        let grant = source
            .mint_read_grant(&address, now - Duration::minutes(5), now + Duration::minutes(5))
            .await
            .unwrap();

        let destination = BlobAddress::new("2023", "wk1/dy1/c/blob");
        backup.ensure_container("2023").await.unwrap();
        let copy_id = backup.begin_server_copy(&destination, &grant).await.unwrap();

        assert_eq!(backup.server_copies(), vec![copy_id]);
        assert_eq!(
            backup.blob_bytes(&destination),
            Some(Bytes::from_static(b"payload"))
        );
    }

    #[tokio::test]
    async fn test_server_copy_rejects_expired_grant() {
        let cloud = MemoryBlobCloud::new();
        let source = cloud.account("source");
        let backup = cloud.account("backup");
        let address = BlobAddress::new("c", "blob");
        source.put_blob(&address, Bytes::from_static(b"payload"));
        backup.ensure_container("c").await.unwrap();

        let now = Utc::now();
        let grant = source
            .mint_read_grant(&address, now - Duration::minutes(10), now - Duration::minutes(1))
            .await
            .unwrap();

        assert!(matches!(
            backup.begin_server_copy(&address, &grant).await,
            Err(BlobStoreError::GrantRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_grants_are_pruned() {
        let store = MemoryBlobCloud::new().account("source");
        let address = BlobAddress::new("c", "blob");
        store.put_blob(&address, Bytes::from_static(b"payload"));

        let now = Utc::now();
        for _ in 0..3 {
            store
                .mint_read_grant(&address, now - Duration::minutes(10), now - Duration::minutes(1))
                .await
                .unwrap();
        }
        let live = store
            .mint_read_grant(&address, now - Duration::minutes(5), now + Duration::minutes(60))
            .await
            .unwrap();

        let state = store.state.lock();
        assert_eq!(state.grants.len(), 1);
        assert!(state
            .grants
            .values()
            .all(|grant| grant.valid_to == live.valid_to));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = MemoryBlobCloud::new().account("a");
        let address = BlobAddress::new("c", "bad");
        store.put_blob(&address, Bytes::from_static(b"x"));
        store.fail_on(address.clone());

        assert!(matches!(
            store.read(&address).await,
            Err(BlobStoreError::Backend(_))
        ));
    }
}
