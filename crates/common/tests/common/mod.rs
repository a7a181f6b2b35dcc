//! Shared test utilities for backup and restore integration tests
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use ::common::queue::EventQueue;
use ::common::testkit::TestEnv;

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Enqueue raw payloads in order.
pub async fn enqueue_all(env: &TestEnv, payloads: &[String]) {
    for payload in payloads {
        env.queue.enqueue(payload).await.unwrap();
    }
}

/// Run backup passes until the queue stops yielding acknowledgements.
pub async fn drain_backup(env: &TestEnv) {
    let worker = env.backup_worker();
    loop {
        let summary = worker.run_once(&env.shutdown).await.unwrap();
        if summary.acknowledged == 0 {
            break;
        }
    }
}
