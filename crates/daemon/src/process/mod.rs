pub mod utils;

use std::path::Path;
use std::time::Duration;

use tokio::time::timeout;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use common::backup::{BackupService, BackupSummary};

use crate::services::{Services, ServicesError};
use crate::state::Config;

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to set up services: {0}")]
    Setup(#[from] ServicesError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    #[error("backup service task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("backup service did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Initialize logging, panic handler, and build info reporting.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(log_level: tracing::Level, log_dir: Option<&Path>) -> Vec<WorkerGuard> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let mut guards = Vec::new();

    // Stdout layer
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    // File layer (if log_dir is set)
    if let Some(log_dir) = log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "blob-backup.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(log_level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        // a second init (e.g. from tests) keeps the first subscriber
        let _ = tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init();
    } else {
        let _ = tracing_subscriber::registry().with(stdout_layer).try_init();
    }

    utils::register_panic_logger();
    utils::report_build_info();

    guards
}

/// Runs the timer driven backup service until SIGINT/SIGTERM.
///
/// The in-flight pass finishes its current message before the service
///  returns; the process is given [`FINAL_SHUTDOWN_TIMEOUT`] to get there.
pub async fn spawn_backup_service(
    config: &Config,
    db_path: &Path,
) -> Result<BackupSummary, ProcessError> {
    let services = Services::from_config(config, db_path).await?;
    let (graceful_waiter, _shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;

    let service = BackupService::new(services.backup_worker());
    let handle = tokio::spawn(async move { service.run(shutdown_rx).await });

    tracing::info!(
        queue = %config.queue.name,
        database = %db_path.display(),
        "backup service running"
    );

    let _ = graceful_waiter.await;
    match timeout(FINAL_SHUTDOWN_TIMEOUT, handle).await {
        Ok(joined) => Ok(joined?),
        Err(_) => {
            tracing::error!(
                "Failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            );
            Err(ProcessError::ShutdownTimeout(FINAL_SHUTDOWN_TIMEOUT))
        }
    }
}
