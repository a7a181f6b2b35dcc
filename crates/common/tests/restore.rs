//! Integration tests for restore replay

mod common;

use ::common::blob_store::BlobStore;
use ::common::event::BlobAddress;
use ::common::event_log::EventLog;
use ::common::restore::{RestoreWindow, RestoreWorker};
use ::common::testkit::{payloads, FailingEventLogProvider, TestEnv};
use bytes::Bytes;

use common::{at, date, drain_backup, enqueue_all};

#[tokio::test]
async fn test_single_day_replays_create_then_delete() {
    let env = TestEnv::new();
    env.put_source("c", "doc.txt", b"doc");
    env.put_source("c", "keep.txt", b"keep");
    env.put_source("c", "later.txt", b"later");

    enqueue_all(
        &env,
        &[
            payloads::created("1", at(2023, 3, 13, 10, 0), "c", "doc.txt"),
            payloads::deleted("2", at(2023, 3, 13, 11, 0), "c", "doc.txt"),
            payloads::created("3", at(2023, 3, 13, 12, 0), "c", "keep.txt"),
            payloads::created("4", at(2023, 3, 14, 9, 0), "c", "later.txt"),
        ],
    )
    .await;
    drain_backup(&env).await;

    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
    let summary = env.restore_worker().run(&window).await;

    assert_eq!(summary.restored, 2);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(env.restore.list_blobs("c"), vec!["keep.txt".to_string()]);
}

#[tokio::test]
async fn test_delete_logged_before_create_in_queue_still_replays_in_time_order() {
    let env = TestEnv::new();
    env.put_source("c", "doc.txt", b"doc");

    // queue order differs from event time order
    enqueue_all(
        &env,
        &[
            payloads::deleted("2", at(2023, 3, 13, 11, 0), "c", "doc.txt"),
            payloads::created("1", at(2023, 3, 13, 10, 0), "c", "doc.txt"),
        ],
    )
    .await;
    drain_backup(&env).await;

    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
    let summary = env.restore_worker().run(&window).await;

    assert_eq!(summary.restored, 1);
    assert_eq!(summary.deleted, 1);
    assert!(env.restore.list_blobs("c").is_empty());
}

#[tokio::test]
async fn test_window_across_week_boundary() {
    let env = TestEnv::new();
    for name in ["fri.txt", "sat.txt", "sun.txt", "mon.txt", "tue.txt"] {
        env.put_source("c", name, b"x");
    }

    enqueue_all(
        &env,
        &[
            payloads::created("fri", at(2023, 3, 17, 23, 59), "c", "fri.txt"),
            payloads::created("sat", at(2023, 3, 18, 23, 59), "c", "sat.txt"),
            payloads::created("sun", at(2023, 3, 19, 0, 0), "c", "sun.txt"),
            payloads::created("mon", at(2023, 3, 20, 12, 0), "c", "mon.txt"),
            payloads::created("tue", at(2023, 3, 21, 0, 0), "c", "tue.txt"),
        ],
    )
    .await;
    drain_backup(&env).await;

    assert_eq!(
        env.backup.list_blobs("2023"),
        vec![
            "wk11/dy5/c/fri.txt".to_string(),
            "wk11/dy6/c/sat.txt".to_string(),
            "wk12/dy0/c/sun.txt".to_string(),
            "wk12/dy1/c/mon.txt".to_string(),
            "wk12/dy2/c/tue.txt".to_string(),
        ]
    );

    let window = RestoreWindow::new(date(2023, 3, 18), date(2023, 3, 20)).unwrap();
    let summary = env.restore_worker().run(&window).await;

    assert_eq!(summary.restored, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        env.restore.list_blobs("c"),
        vec![
            "mon.txt".to_string(),
            "sat.txt".to_string(),
            "sun.txt".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_source_missing_at_backup_is_skipped_on_restore() {
    let env = TestEnv::new();
    enqueue_all(&env, &[payloads::created("1", at(2023, 3, 13, 8, 0), "c", "gone.txt")]).await;
    drain_backup(&env).await;

    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
    let summary = env.restore_worker().run(&window).await;

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.succeeded(), 1);
}

#[tokio::test]
async fn test_missing_backup_copy_is_skipped() {
    let env = TestEnv::new();
    env.put_source("c", "doc.txt", b"doc");
    enqueue_all(&env, &[payloads::created("1", at(2023, 3, 13, 8, 0), "c", "doc.txt")]).await;
    drain_backup(&env).await;

    // the backup copy disappears after it was logged
    let backup = BlobAddress::new("2023", "wk11/dy1/c/doc.txt");
    assert!(env.backup.blob_bytes(&backup).is_some());
    env.backup.delete_if_exists(&backup).await.unwrap();

    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
    let summary = env.restore_worker().run(&window).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn test_failing_event_does_not_abort_replay() {
    let env = TestEnv::new();
    env.put_source("c", "a.txt", b"a");
    env.put_source("c", "b.txt", b"b");
    enqueue_all(
        &env,
        &[
            payloads::created("1", at(2023, 3, 13, 8, 0), "c", "a.txt"),
            payloads::created("2", at(2023, 3, 13, 9, 0), "c", "b.txt"),
        ],
    )
    .await;
    drain_backup(&env).await;

    env.restore.fail_on(BlobAddress::new("c", "a.txt"));

    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 13)).unwrap();
    let summary = env.restore_worker().run(&window).await;
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.restored, 1);
    assert_eq!(
        env.restore.blob_bytes(&BlobAddress::new("c", "b.txt")),
        Some(Bytes::from_static(b"b"))
    );
}

#[tokio::test]
async fn test_failed_day_scan_counts_once_per_day() {
    let env = TestEnv::new();
    let provider = FailingEventLogProvider::new();
    provider.fail_queries(true);

    let worker = RestoreWorker::new(EventLog::new(provider), env.copier());
    let window = RestoreWindow::new(date(2023, 3, 13), date(2023, 3, 15)).unwrap();
    let summary = worker.run(&window).await;

    assert_eq!(summary.failed, 3);
    assert_eq!(summary.succeeded(), 0);
}
