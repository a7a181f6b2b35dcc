//! Durable, week-partitioned log of observed blob events.
//!
//! Records are keyed by `{year}_{week}` / `{tick}_{id}` so a calendar day
//!  is a contiguous row key range inside a single partition.

mod memory;
mod provider;
mod record;

use chrono::{DateTime, Utc};
use tracing::debug;

pub use memory::{MemoryEventLogProvider, MemoryEventLogProviderError};
pub use provider::{ContinuationToken, EventLogError, EventLogProvider, RangeQuery, RecordPage};
pub use record::{
    backup_address, BackupOutcome, DestinationBlobInfo, LogEntry, LogRecord, RecordError,
    StoredRecord, SYNC_COPY_REFERENCE,
};

use crate::partition::{partition_key, tick_string};

pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Event log over a storage provider.
#[derive(Debug, Clone)]
pub struct EventLog<P> {
    provider: P,
    page_size: usize,
}

impl<P: EventLogProvider> EventLog<P> {
    pub fn new(provider: P) -> Self {
        Self::with_page_size(provider, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(provider: P, page_size: usize) -> Self {
        Self {
            provider,
            page_size: page_size.max(1),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Persist a record. Errors propagate: the caller must not treat the
    ///  event as handled unless this succeeds.
    pub async fn append(&self, record: &LogRecord) -> Result<(), EventLogError<P::Error>> {
        let stored = record
            .to_stored()
            .map_err(|e| EventLogError::Record(e.to_string()))?;

        debug!(
            partition_key = %stored.partition_key,
            row_key = %stored.row_key,
            "appending event log record"
        );
        self.provider.insert(stored).await
    }

    /// Every record in partition `{year}_{week}` observed in `[start, end)`,
    ///  in ascending row key (chronological) order, with payloads decoded.
    ///
    /// Pages through the provider until the range is exhausted.
    pub async fn scan(
        &self,
        year: i32,
        week: u32,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<LogEntry>, EventLogError<P::Error>> {
        let query = RangeQuery {
            partition_key: partition_key(year, week),
            lower_inclusive: tick_string(start),
            upper_exclusive: tick_string(end),
            page_size: self.page_size,
        };

        let mut entries = Vec::new();
        let mut continuation: Option<ContinuationToken> = None;
        let mut pages = 0usize;
        loop {
            let page = self
                .provider
                .query_range(&query, continuation.as_ref())
                .await?;
            pages += 1;
            entries.extend(page.records.into_iter().map(StoredRecord::into_entry));

            match page.continuation {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        debug!(
            partition_key = %query.partition_key,
            pages = pages,
            records = entries.len(),
            "scanned event log range"
        );
        Ok(entries)
    }
}
