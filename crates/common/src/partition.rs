//! Partition coordinates derived from an event instant.
//!
//! Every logged event lands in a partition named `{year}_{week}` and is
//! ordered inside it by a fixed-width tick string. Backup and restore both
//! derive coordinates through [`PartitionCoordinates::from_instant`], so the
//! week rule here is load-bearing: changing it orphans every record already
//! written.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Ticks (100ns units) between 0001-01-01T00:00:00Z and the unix epoch.
const UNIX_EPOCH_TICKS: i64 = 621_355_968_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

/// Width of a tick string. `i64::MAX` has 19 digits.
pub const TICK_WIDTH: usize = 19;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionCoordinates {
    /// Calendar year of the instant
    pub year: i32,
    /// 1-based week of year under the first-full-week rule, weeks start on Sunday
    pub week: u32,
    /// 0 = Sunday .. 6 = Saturday
    pub day_of_week: u32,
    /// Zero padded tick count, lexicographic order == chronological order
    pub tick: String,
}

impl PartitionCoordinates {
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        let date = instant.date_naive();
        Self {
            year: date.year(),
            week: week_of_year(date),
            day_of_week: date.weekday().num_days_from_sunday(),
            tick: tick_string(instant),
        }
    }

    /// Coordinates of midnight (UTC) at the start of `date`.
    pub fn from_date(date: NaiveDate) -> Self {
        Self::from_instant(day_start(date))
    }

    pub fn partition_key(&self) -> String {
        partition_key(self.year, self.week)
    }

    /// Row key for an event observed at these coordinates. Hyphens are
    /// stripped from the producer id.
    pub fn row_key(&self, event_id: &str) -> String {
        format!("{}_{}", self.tick, event_id.replace('-', ""))
    }
}

impl fmt::Display for PartitionCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{} (day {}, tick {})",
            self.year, self.week, self.day_of_week, self.tick
        )
    }
}

pub fn partition_key(year: i32, week: u32) -> String {
    format!("{}_{}", year, week)
}

/// Midnight UTC at the start of `date`.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// 100ns ticks since 0001-01-01T00:00:00Z. Instants before that epoch
///  saturate at zero.
pub fn ticks(instant: DateTime<Utc>) -> i64 {
    let sub_ticks = i64::from(instant.timestamp_subsec_nanos() / NANOS_PER_TICK);
    instant
        .timestamp()
        .saturating_mul(TICKS_PER_SECOND)
        .saturating_add(sub_ticks)
        .saturating_add(UNIX_EPOCH_TICKS)
        .max(0)
}

pub fn tick_string(instant: DateTime<Utc>) -> String {
    format!("{:0width$}", ticks(instant), width = TICK_WIDTH)
}

/// Week of year using the first-full-week rule with Sunday as the first
/// day of the week.
///
/// Week 1 starts on the first Sunday of the year. Days before that Sunday
/// belong to the last week of the previous year, even though the partition
/// year stays the calendar year of the date.
pub fn week_of_year(date: NaiveDate) -> u32 {
    let day_of_year = i64::from(date.ordinal0());
    let day_of_week = i64::from(date.weekday().num_days_from_sunday());
    let jan1 = (day_of_week - day_of_year % 7).rem_euclid(7);
    // days from Jan 1 to the first Sunday
    let offset = (7 - jan1) % 7;
    let day = day_of_year - offset;
    if day >= 0 {
        return (day / 7 + 1) as u32;
    }

    NaiveDate::from_ymd_opt(date.year() - 1, 12, 31).map_or(1, week_of_year)
}
