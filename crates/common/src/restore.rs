//! The restore path: replay logged events for a range of calendar days
//!  against the restore account.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, error, info, warn};

use crate::copy::{BlobCopier, CopyError};
use crate::event::BlobEvent;
use crate::event_log::{BackupOutcome, EventLog, EventLogProvider, LogEntry};
use crate::partition::{day_start, partition_key, PartitionCoordinates};

#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("start date {start} is after end date {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("copy failed: {0}")]
    Copy(#[from] CopyError),
    #[error("logged event is malformed: {0}")]
    Malformed(String),
    #[error("backup outcome unreadable: {0}")]
    Unreadable(String),
}

/// One calendar day of a restore, with the partition it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreDay {
    pub year: i32,
    pub week: u32,
    pub date: NaiveDate,
}

impl RestoreDay {
    pub fn new(date: NaiveDate) -> Self {
        let coordinates = PartitionCoordinates::from_date(date);
        Self {
            year: coordinates.year,
            week: coordinates.week,
            date,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        day_start(self.date)
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::days(1)
    }

    pub fn partition_key(&self) -> String {
        partition_key(self.year, self.week)
    }
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl RestoreWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RestoreError> {
        if start > end {
            return Err(RestoreError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Every day in the window, ascending.
    pub fn days(&self) -> Vec<RestoreDay> {
        self.start
            .iter_days()
            .take_while(|date| *date <= self.end)
            .map(RestoreDay::new)
            .collect()
    }
}

impl fmt::Display for RestoreWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} through {}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    /// Blobs copied back into the restore account
    pub restored: u64,
    /// Deletions applied to the restore account
    pub deleted: u64,
    /// Events with nothing to do, e.g. a blob absent at backup time
    pub skipped: u64,
    pub failed: u64,
}

impl RestoreSummary {
    pub fn succeeded(&self) -> u64 {
        self.restored + self.deleted + self.skipped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplayOutcome {
    Restored,
    Deleted,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct RestoreWorker<P> {
    log: EventLog<P>,
    copier: BlobCopier,
}

impl<P: EventLogProvider> RestoreWorker<P> {
    pub fn new(log: EventLog<P>, copier: BlobCopier) -> Self {
        Self { log, copier }
    }

    /// Replay every logged event in `window` day by day, in chronological
    ///  order. Failures are counted and never stop the run.
    pub async fn run(&self, window: &RestoreWindow) -> RestoreSummary {
        info!(window = %window, "starting restore");

        let mut summary = RestoreSummary::default();
        for day in window.days() {
            let entries = match self.log.scan(day.year, day.week, day.start(), day.end()).await {
                Ok(entries) => entries,
                Err(e) => {
                    summary.failed += 1;
                    error!(
                        date = %day.date,
                        partition_key = %day.partition_key(),
                        "failed to scan event log: {}",
                        e
                    );
                    continue;
                }
            };
            debug!(
                date = %day.date,
                partition_key = %day.partition_key(),
                events = entries.len(),
                "replaying day"
            );

            for entry in entries {
                match self.replay(&entry).await {
                    Ok(ReplayOutcome::Restored) => summary.restored += 1,
                    Ok(ReplayOutcome::Deleted) => summary.deleted += 1,
                    Ok(ReplayOutcome::Skipped) => summary.skipped += 1,
                    Err(e) => {
                        summary.failed += 1;
                        error!(
                            row_key = %entry.row_key,
                            payload = %entry.event_json,
                            "failed to replay event: {}",
                            e
                        );
                    }
                }
            }
        }

        info!(
            restored = summary.restored,
            deleted = summary.deleted,
            skipped = summary.skipped,
            failed = summary.failed,
            "restore complete"
        );
        summary
    }

    async fn replay(&self, entry: &LogEntry) -> Result<ReplayOutcome, RestoreError> {
        match (&entry.event, &entry.outcome) {
            (BlobEvent::Malformed(malformed), _) => {
                Err(RestoreError::Malformed(malformed.reason.clone()))
            }
            (BlobEvent::Created(_), BackupOutcome::Unreadable(reason)) => {
                Err(RestoreError::Unreadable(reason.clone()))
            }
            (BlobEvent::Created(created), BackupOutcome::Copied(info)) => {
                match self.copier.copy_from_backup_to_restore(info).await? {
                    Some(_) => Ok(ReplayOutcome::Restored),
                    None => {
                        warn!(
                            event_id = %created.id,
                            blob = %info.backup_address(),
                            "backup copy is missing, skipping"
                        );
                        Ok(ReplayOutcome::Skipped)
                    }
                }
            }
            (BlobEvent::Created(created), _) => {
                info!(
                    event_id = %created.id,
                    url = %created.data.url,
                    "ignored, blob was absent at backup time, likely already deleted"
                );
                Ok(ReplayOutcome::Skipped)
            }
            (BlobEvent::Deleted(deleted), _) => {
                if self.copier.delete_from_restore(deleted).await? {
                    Ok(ReplayOutcome::Deleted)
                } else {
                    Ok(ReplayOutcome::Skipped)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_rejects_reversed_range() {
        assert!(matches!(
            RestoreWindow::new(date(2023, 3, 14), date(2023, 3, 13)),
            Err(RestoreError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_single_day_window() {
        let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
        let days = window.days();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].partition_key(), "2023_11");
        assert_eq!(days[0].end() - days[0].start(), Duration::days(1));
    }

    #[test]
    fn test_window_switches_week_on_sunday() {
        let window = RestoreWindow::new(date(2023, 3, 18), date(2023, 3, 20)).unwrap();
        let keys: Vec<_> = window.days().iter().map(RestoreDay::partition_key).collect();
        assert_eq!(keys, vec!["2023_11", "2023_12", "2023_12"]);
    }

    #[test]
    fn test_window_across_year_end() {
        let window = RestoreWindow::new(date(2022, 12, 31), date(2023, 1, 1)).unwrap();
        let days = window.days();
        assert_eq!(days[0].year, 2022);
        assert_eq!(days[1].year, 2023);
        assert_eq!(days[1].date, date(2023, 1, 1));
    }

    #[test]
    fn test_summary_success_count() {
        let summary = RestoreSummary {
            restored: 2,
            deleted: 1,
            skipped: 3,
            failed: 4,
        };
        assert_eq!(summary.succeeded(), 6);
    }
}
