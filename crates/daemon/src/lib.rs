// Service modules
pub mod database;
pub mod process;
pub mod services;

// App state (configuration, paths)
pub mod state;

pub use database::{Database, DatabaseSetupError, SqliteEventQueue};
pub use process::{init_logging, spawn_backup_service, ProcessError};
pub use services::{Services, ServicesError};
pub use state::{AppState, Config, StateError};
