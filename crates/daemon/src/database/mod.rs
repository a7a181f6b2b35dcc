pub mod event_log_provider;
pub mod event_queue;
mod sqlite;

use std::ops::Deref;
use std::path::Path;

use sqlx::SqlitePool;

pub use event_queue::SqliteEventQueue;

#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    /// Open (creating if missing) a database file and migrate it.
    pub async fn open(path: &Path) -> Result<Self, DatabaseSetupError> {
        let db = sqlite::open_sqlite_file(path).await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    /// A migrated, private in-memory database.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let db = sqlite::open_sqlite_memory().await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("unable to create the database directory: {0}")]
    Io(#[from] std::io::Error),
}
