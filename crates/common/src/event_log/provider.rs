use std::fmt::{Debug, Display};

use async_trait::async_trait;

use super::record::StoredRecord;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError<T> {
    /// The backing store failed
    #[error("unhandled event log provider error: {0}")]
    Provider(#[from] T),
    /// The record could not be serialized for storage
    #[error("record cannot be stored: {0}")]
    Record(String),
    /// A continuation token that does not belong to the query
    #[error("invalid continuation token: {0}")]
    InvalidContinuation(String),
}

/// Opaque position inside a range query. Holds the last row key handed
///  out; the next page starts strictly after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    pub fn after(row_key: impl Into<String>) -> Self {
        Self(row_key.into())
    }

    pub fn row_key(&self) -> &str {
        &self.0
    }
}

/// A row key range inside one partition: `[lower_inclusive, upper_exclusive)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    pub partition_key: String,
    pub lower_inclusive: String,
    pub upper_exclusive: String,
    pub page_size: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    /// Records in ascending row key order
    pub records: Vec<StoredRecord>,
    /// Set when more records may follow
    pub continuation: Option<ContinuationToken>,
}

#[async_trait]
pub trait EventLogProvider: Send + Sync + std::fmt::Debug + Clone + 'static {
    type Error: Display + Debug + Send + Sync + 'static;

    /// Store a record under its partition and row key.
    ///
    /// Inserting a key that already exists overwrites the earlier record,
    ///  so a redelivered event never produces a second row.
    async fn insert(&self, record: StoredRecord) -> Result<(), EventLogError<Self::Error>>;

    /// Fetch one page of a row key range, in ascending row key order.
    ///
    /// # Arguments
    /// * `query` - partition, row key bounds and page size
    /// * `continuation` - token from the previous page, `None` for the first
    ///
    /// # Returns
    /// * `Ok(RecordPage)` - at most `query.page_size` records, and a
    ///   continuation token if the range is not exhausted
    async fn query_range(
        &self,
        query: &RangeQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RecordPage, EventLogError<Self::Error>>;

    /// Number of records stored in a partition
    async fn count(&self, partition_key: &str) -> Result<u64, EventLogError<Self::Error>>;
}
