use std::path::PathBuf;

use clap::Args;
use tokio::io::AsyncReadExt;

use blob_backup_daemon::database::{Database, DatabaseSetupError, SqliteEventQueue};
use blob_backup_daemon::state::StateError;
use common::queue::{EventQueue, QueueError};

#[derive(Args, Debug, Clone)]
pub struct Enqueue {
    /// Files holding one event JSON document or a JSON array of events.
    ///  Reads stdin when none are given.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("failed to load state: {0}")]
    State(#[from] StateError),

    #[error("failed to open database: {0}")]
    Database(#[from] DatabaseSetupError),

    #[error("failed to read input: {0}")]
    Io(#[from] std::io::Error),

    #[error("input {0} is not valid JSON: {1}")]
    InvalidJson(String, serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Split one input into raw event payloads.
pub fn payloads(input: &str) -> Result<Vec<String>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    Ok(match value {
        serde_json::Value::Array(events) => events.iter().map(|event| event.to_string()).collect(),
        event => vec![event.to_string()],
    })
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Enqueue {
    type Error = EnqueueError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let state = ctx.state()?;

        let mut inputs = Vec::new();
        if self.files.is_empty() {
            let mut input = String::new();
            tokio::io::stdin().read_to_string(&mut input).await?;
            inputs.push(("stdin".to_string(), input));
        } else {
            for file in &self.files {
                let input = tokio::fs::read_to_string(file).await?;
                inputs.push((file.display().to_string(), input));
            }
        }

        let mut events = Vec::new();
        for (name, input) in inputs {
            let parsed = payloads(&input).map_err(|e| EnqueueError::InvalidJson(name, e))?;
            events.extend(parsed);
        }

        let db = Database::open(&state.db_path).await?;
        let queue = SqliteEventQueue::new(db, state.config.queue.name.clone());
        for event in &events {
            queue.enqueue(event).await?;
        }

        Ok(format!(
            "Enqueued {} event(s) on queue '{}' ({} waiting)",
            events.len(),
            queue.name(),
            queue.approximate_len().await?
        ))
    }
}
