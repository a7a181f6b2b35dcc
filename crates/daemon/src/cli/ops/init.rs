use std::path::PathBuf;

use clap::Args;

use blob_backup_daemon::database::{Database, DatabaseSetupError};
use blob_backup_daemon::state::{AppState, Config, StateError};
use object_store::AccountConfig;

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Local directory for the source account (in-memory if not set)
    #[arg(long)]
    pub source_path: Option<PathBuf>,

    /// Local directory for the backup account (in-memory if not set)
    #[arg(long)]
    pub backup_path: Option<PathBuf>,

    /// Local directory for the restore account (in-memory if not set)
    #[arg(long)]
    pub restore_path: Option<PathBuf>,

    /// Let the backup account pull blobs itself instead of streaming them
    #[arg(long)]
    pub server_copy: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] StateError),

    #[error("failed to create database: {0}")]
    Database(#[from] DatabaseSetupError),
}

fn local_account(path: &Option<PathBuf>) -> AccountConfig {
    match path {
        Some(path) => AccountConfig::Local { path: path.clone() },
        None => AccountConfig::Memory,
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = Config::default();
        config.accounts.source = local_account(&self.source_path);
        config.accounts.backup = local_account(&self.backup_path);
        config.accounts.restore = local_account(&self.restore_path);
        config.copy.server_copy = self.server_copy;

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        Database::open(&state.db_path).await?;

        let output = format!(
            "Initialized blob-backup directory at: {}\n\
             - Database: {}\n\
             - Config: {}\n\
             - Queue: {}\n\
             - Server copy: {}",
            state.app_dir.display(),
            state.db_path.display(),
            state.config_path.display(),
            state.config.queue.name,
            state.config.copy.server_copy,
        );

        Ok(output)
    }
}
