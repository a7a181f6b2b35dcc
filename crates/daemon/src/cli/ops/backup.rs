use clap::Args;
use tokio::sync::watch;

use blob_backup_daemon::process::{self, ProcessError};
use blob_backup_daemon::services::{Services, ServicesError};
use blob_backup_daemon::state::StateError;
use common::backup::{BackupError, BackupSummary};

#[derive(Args, Debug, Clone)]
pub struct Backup {
    /// Run a single pass over the queue instead of polling until shutdown
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BackupOpError {
    #[error("failed to load state: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Services(#[from] ServicesError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("backup pass failed: {0}")]
    Pass(#[from] BackupError),
}

fn report(summary: &BackupSummary) -> String {
    format!(
        "Backup finished: {} received, {} acknowledged\n\
         - Copied: {}\n\
         - Source missing: {}\n\
         - Undecodable (left on queue): {}\n\
         - Failed (left on queue): {}",
        summary.received,
        summary.acknowledged,
        summary.copied,
        summary.source_missing,
        summary.undecodable,
        summary.failed,
    )
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Backup {
    type Error = BackupOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;
        let _guards = crate::cli::op::init_logging(&state);

        let summary = if self.once {
            let services = Services::from_config(&state.config, &state.db_path).await?;
            // never fires: a single pass runs to completion
            let (_shutdown_tx, shutdown_rx) = watch::channel(());
            services.backup_worker().run_once(&shutdown_rx).await?
        } else {
            process::spawn_backup_service(&state.config, &state.db_path).await?
        };

        Ok(report(&summary))
    }
}
