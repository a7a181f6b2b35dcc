use std::path::Path;
use std::sync::Arc;

use common::backup::BackupWorker;
use common::copy::BlobCopier;
use common::event_log::EventLog;
use common::restore::RestoreWorker;
use object_store::{AccountConfig, ObjectBlobStore, ObjectBlobStoreError};

use crate::database::{Database, DatabaseSetupError, SqliteEventQueue};
use crate::state::Config;

#[derive(Debug, thiserror::Error)]
pub enum ServicesError {
    #[error("database setup failed: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("failed to open the {account} account: {source}")]
    Account {
        account: &'static str,
        #[source]
        source: ObjectBlobStoreError,
    },
}

/// Everything the backup and restore paths run against, built once from
///  [`Config`].
#[derive(Debug, Clone)]
pub struct Services {
    pub database: Database,
    pub source: ObjectBlobStore,
    pub backup: ObjectBlobStore,
    pub restore: ObjectBlobStore,
    config: Config,
}

impl Services {
    /// Open the database at `db_path` and the three configured accounts.
    pub async fn from_config(config: &Config, db_path: &Path) -> Result<Self, ServicesError> {
        let database = Database::open(db_path).await?;
        Self::with_database(config, database).await
    }

    pub async fn with_database(config: &Config, database: Database) -> Result<Self, ServicesError> {
        Ok(Self {
            source: open_account("source", &config.accounts.source).await?,
            backup: open_account("backup", &config.accounts.backup).await?,
            restore: open_account("restore", &config.accounts.restore).await?,
            database,
            config: config.clone(),
        })
    }

    pub fn copier(&self) -> BlobCopier {
        BlobCopier::new(
            Arc::new(self.source.clone()),
            Arc::new(self.backup.clone()),
            Arc::new(self.restore.clone()),
            self.config.copy.settings(),
        )
    }

    pub fn event_log(&self) -> EventLog<Database> {
        EventLog::with_page_size(self.database.clone(), self.config.log.page_size)
    }

    pub fn queue(&self) -> SqliteEventQueue {
        SqliteEventQueue::new(self.database.clone(), self.config.queue.name.clone())
    }

    pub fn backup_worker(&self) -> BackupWorker<SqliteEventQueue, Database> {
        BackupWorker::new(
            self.queue(),
            self.event_log(),
            self.copier(),
            self.config.queue.settings(),
        )
    }

    pub fn restore_worker(&self) -> RestoreWorker<Database> {
        RestoreWorker::new(self.event_log(), self.copier())
    }
}

async fn open_account(
    account: &'static str,
    config: &AccountConfig,
) -> Result<ObjectBlobStore, ServicesError> {
    tracing::debug!(account = account, config = ?redacted(config), "opening storage account");
    ObjectBlobStore::new(account, config.clone())
        .await
        .map_err(|source| ServicesError::Account { account, source })
}

/// Account config with credentials stripped, for logging.
fn redacted(config: &AccountConfig) -> AccountConfig {
    match config {
        AccountConfig::S3 {
            endpoint,
            bucket,
            region,
            ..
        } => AccountConfig::S3 {
            endpoint: endpoint.clone(),
            access_key: "<redacted>".to_string(),
            secret_key: "<redacted>".to_string(),
            bucket: bucket.clone(),
            region: region.clone(),
        },
        other => other.clone(),
    }
}
