use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::provider::{ContinuationToken, EventLogError, EventLogProvider, RangeQuery, RecordPage};
use super::record::StoredRecord;

/// In-memory event log provider: partition key -> row key -> record
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLogProvider {
    inner: Arc<RwLock<HashMap<String, BTreeMap<String, StoredRecord>>>>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryEventLogProviderError {
    #[error("memory provider error: {0}")]
    Internal(String),
}

impl MemoryEventLogProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> EventLogError<MemoryEventLogProviderError> {
    EventLogError::Provider(MemoryEventLogProviderError::Internal(format!(
        "failed to acquire lock: {}",
        e
    )))
}

#[async_trait]
impl EventLogProvider for MemoryEventLogProvider {
    type Error = MemoryEventLogProviderError;

    async fn insert(&self, record: StoredRecord) -> Result<(), EventLogError<Self::Error>> {
        let mut inner = self.inner.write().map_err(lock_error)?;
        inner
            .entry(record.partition_key.clone())
            .or_default()
            .insert(record.row_key.clone(), record);
        Ok(())
    }

    async fn query_range(
        &self,
        query: &RangeQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RecordPage, EventLogError<Self::Error>> {
        let inner = self.inner.read().map_err(lock_error)?;
        let Some(partition) = inner.get(&query.partition_key) else {
            return Ok(RecordPage::default());
        };

        let lower = match continuation {
            Some(token) => {
                if token.row_key() < query.lower_inclusive.as_str() {
                    return Err(EventLogError::InvalidContinuation(
                        token.row_key().to_string(),
                    ));
                }
                if token.row_key() >= query.upper_exclusive.as_str() {
                    return Ok(RecordPage::default());
                }
                Bound::Excluded(token.row_key().to_string())
            }
            None => Bound::Included(query.lower_inclusive.clone()),
        };
        if query.upper_exclusive <= query.lower_inclusive {
            return Ok(RecordPage::default());
        }
        let upper = Bound::Excluded(query.upper_exclusive.clone());

        let page_size = query.page_size.max(1);
        let mut range = partition.range((lower, upper));
        let records: Vec<StoredRecord> = range
            .by_ref()
            .take(page_size)
            .map(|(_, record)| record.clone())
            .collect();

        let continuation = match (range.next(), records.last()) {
            (Some(_), Some(last)) => Some(ContinuationToken::after(last.row_key.clone())),
            _ => None,
        };

        Ok(RecordPage {
            records,
            continuation,
        })
    }

    async fn count(&self, partition_key: &str) -> Result<u64, EventLogError<Self::Error>> {
        let inner = self.inner.read().map_err(lock_error)?;
        Ok(inner
            .get(partition_key)
            .map(|partition| partition.len() as u64)
            .unwrap_or_default())
    }
}
