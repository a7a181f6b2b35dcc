use chrono::NaiveDate;
use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use blob_backup_daemon::services::{Services, ServicesError};
use blob_backup_daemon::state::StateError;
use common::restore::{RestoreError, RestoreWindow};

const DATE_FORMATS: [&str; 2] = ["%m/%d/%Y", "%Y-%m-%d"];

/// Parse a restore date as `MM/DD/YYYY` or `YYYY-MM-DD`.
pub fn parse_restore_date(input: &str) -> Result<NaiveDate, String> {
    let input = input.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
        .ok_or_else(|| format!("'{}' is not a date (expected MM/DD/YYYY or YYYY-MM-DD)", input))
}

#[derive(Args, Debug, Clone)]
pub struct Restore {
    /// First day to replay, inclusive
    #[arg(value_parser = parse_restore_date)]
    pub start: NaiveDate,

    /// Last day to replay, inclusive
    #[arg(value_parser = parse_restore_date)]
    pub end: NaiveDate,

    /// Skip the confirmation prompt
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum RestoreOpError {
    #[error("failed to load state: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Window(#[from] RestoreError),

    #[error(transparent)]
    Services(#[from] ServicesError),

    #[error("failed to read confirmation: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a prompt answer confirms the restore.
fn is_confirmation(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

async fn confirm(window: &RestoreWindow) -> Result<bool, std::io::Error> {
    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(
            format!(
                "Restore will replay events captured from {}.\nType Y to continue: ",
                window
            )
            .as_bytes(),
        )
        .await?;
    stdout.flush().await?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    Ok(is_confirmation(&answer))
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Restore {
    type Error = RestoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let window = RestoreWindow::new(self.start, self.end)?;
        let state = ctx.state()?;

        if !self.yes && !confirm(&window).await? {
            return Ok("Restore cancelled".to_string());
        }

        let _guards = crate::cli::op::init_logging(&state);
        let services = Services::from_config(&state.config, &state.db_path).await?;
        let summary = services.restore_worker().run(&window).await;

        Ok(format!(
            "Restore of {} finished: {} succeeded, {} failed\n\
             - Restored: {}\n\
             - Deleted: {}\n\
             - Skipped: {}",
            window,
            summary.succeeded(),
            summary.failed,
            summary.restored,
            summary.deleted,
            summary.skipped,
        ))
    }
}
