//! Shared setup for daemon integration tests
#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use tempfile::TempDir;
use tokio::sync::watch;

use ::common::backup::BackupSummary;
use ::common::blob_store::BlobStore;
use ::common::event::BlobAddress;
use ::common::queue::EventQueue;
use blob_backup_daemon::state::Config;
use blob_backup_daemon::{Database, Services};
use object_store::{AccountConfig, CopyStatus, ObjectBlobStore};

/// Three local-disk accounts and an in-memory database.
pub struct Deployment {
    pub dir: TempDir,
    pub config: Config,
    pub services: Services,
    shutdown_tx: watch::Sender<()>,
    pub shutdown: watch::Receiver<()>,
}

pub fn config_for(dir: &TempDir, server_copy: bool) -> Config {
    let mut config = Config::default();
    config.accounts.source = AccountConfig::Local {
        path: dir.path().join("source"),
    };
    config.accounts.backup = AccountConfig::Local {
        path: dir.path().join("backup"),
    };
    config.accounts.restore = AccountConfig::Local {
        path: dir.path().join("restore"),
    };
    config.copy.server_copy = server_copy;
    // unacked messages come straight back
    config.queue.visibility_timeout_ms = 0;
    config.queue.poll_interval_ms = 10;
    config
}

pub async fn deployment(server_copy: bool) -> Deployment {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(&dir, server_copy);
    let database = Database::in_memory().await.unwrap();
    let services = Services::with_database(&config, database).await.unwrap();
    let (shutdown_tx, shutdown) = watch::channel(());

    Deployment {
        dir,
        config,
        services,
        shutdown_tx,
        shutdown,
    }
}

impl Deployment {
    pub async fn enqueue_all(&self, payloads: &[String]) {
        let queue = self.services.queue();
        for payload in payloads {
            queue.enqueue(payload).await.unwrap();
        }
    }

    pub async fn backup_once(&self) -> BackupSummary {
        self.services
            .backup_worker()
            .run_once(&self.shutdown)
            .await
            .unwrap()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

/// Write a blob, creating its container first.
pub async fn put(store: &ObjectBlobStore, container: &str, blob: &str, data: &'static [u8]) {
    store.ensure_container(container).await.unwrap();
    let chunks = stream::iter([Ok(Bytes::from_static(data))]).boxed();
    store
        .write(&BlobAddress::new(container, blob), chunks)
        .await
        .unwrap();
}

pub async fn get(store: &ObjectBlobStore, container: &str, blob: &str) -> Option<Vec<u8>> {
    let address = BlobAddress::new(container, blob);
    if !store.exists(&address).await.unwrap() {
        return None;
    }
    let chunks: Vec<Bytes> = store
        .read(&address)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    Some(chunks.concat())
}

/// Wait for a scheduled server copy to settle.
pub async fn wait_for_copy(store: &ObjectBlobStore, copy_id: &str) -> CopyStatus {
    for _ in 0..200 {
        match store.copy_status(copy_id) {
            Some(CopyStatus::Pending) | None => {
                tokio::time::sleep(Duration::from_millis(10)).await
            }
            Some(status) => return status,
        }
    }
    panic!("server copy {} did not finish", copy_id);
}

/// Wait until a blob shows up in an account.
pub async fn wait_for_blob(store: &ObjectBlobStore, container: &str, blob: &str) -> Vec<u8> {
    for _ in 0..200 {
        if let Some(data) = get(store, container, blob).await {
            return data;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{}/{} never appeared", container, blob);
}
