use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::event_log::{
    ContinuationToken, EventLogError, EventLogProvider, MemoryEventLogProvider, RangeQuery,
    RecordPage, StoredRecord,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("injected failure: {0}")]
pub struct InjectedFailure(pub String);

/// Memory provider whose inserts and scans can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct FailingEventLogProvider {
    inner: MemoryEventLogProvider,
    fail_inserts: Arc<AtomicBool>,
    fail_queries: Arc<AtomicBool>,
}

impl FailingEventLogProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryEventLogProvider {
        &self.inner
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventLogProvider for FailingEventLogProvider {
    type Error = InjectedFailure;

    async fn insert(&self, record: StoredRecord) -> Result<(), EventLogError<Self::Error>> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(EventLogError::Provider(InjectedFailure(format!(
                "insert of {}",
                record.row_key
            ))));
        }
        self.inner
            .insert(record)
            .await
            .map_err(|e| EventLogError::Provider(InjectedFailure(e.to_string())))
    }

    async fn query_range(
        &self,
        query: &RangeQuery,
        continuation: Option<&ContinuationToken>,
    ) -> Result<RecordPage, EventLogError<Self::Error>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(EventLogError::Provider(InjectedFailure(format!(
                "query of {}",
                query.partition_key
            ))));
        }
        self.inner
            .query_range(query, continuation)
            .await
            .map_err(|e| EventLogError::Provider(InjectedFailure(e.to_string())))
    }

    async fn count(&self, partition_key: &str) -> Result<u64, EventLogError<Self::Error>> {
        self.inner
            .count(partition_key)
            .await
            .map_err(|e| EventLogError::Provider(InjectedFailure(e.to_string())))
    }
}
