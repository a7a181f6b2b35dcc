use std::{fs, path::PathBuf, time::Duration};

use common::backup::BackupSettings;
use common::copy::{CopySettings, TransferStrategy};
use common::event_log::DEFAULT_PAGE_SIZE;
use common::queue::{clamp_batch_size, MAX_BATCH_SIZE};
use object_store::AccountConfig;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "blob-backup";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const DEFAULT_QUEUE_NAME: &str = "blob-events";
/// Longest grant lifetime or skew accepted from config (7 days, the S3
///  presign limit).
pub const MAX_GRANT_MINUTES: i64 = 7 * 24 * 60;

/// The three storage accounts the service moves blobs between.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AccountsConfig {
    /// Account whose blob events are being recorded
    pub source: AccountConfig,
    /// Account holding the week/day laid out backup copies
    pub backup: AccountConfig,
    /// Account that restores are replayed into
    pub restore: AccountConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CopyConfig {
    /// Schedule server side copies instead of streaming bytes through
    ///  this process
    pub server_copy: bool,
    /// Read grant lifetime, clamped to 1..=MAX_GRANT_MINUTES
    pub grant_expiry_minutes: i64,
    /// How far back a read grant's validity starts, clamped to
    ///  0..=MAX_GRANT_MINUTES
    pub grant_clock_skew_minutes: i64,
}

impl Default for CopyConfig {
    fn default() -> Self {
        let defaults = CopySettings::default();
        Self {
            server_copy: false,
            grant_expiry_minutes: defaults.grant_expiry.num_minutes(),
            grant_clock_skew_minutes: defaults.grant_clock_skew.num_minutes(),
        }
    }
}

impl CopyConfig {
    pub fn settings(&self) -> CopySettings {
        CopySettings {
            strategy: TransferStrategy::from_server_copy(self.server_copy),
            grant_expiry: grant_minutes(self.grant_expiry_minutes, 1),
            grant_clock_skew: grant_minutes(self.grant_clock_skew_minutes, 0),
        }
    }
}

fn grant_minutes(minutes: i64, min: i64) -> chrono::Duration {
    chrono::Duration::minutes(minutes.clamp(min, MAX_GRANT_MINUTES))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,
    pub visibility_timeout_ms: u64,
    /// Messages read per poll, clamped to 1..=32
    pub batch_size: usize,
    /// Delay between backup passes
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        let defaults = BackupSettings::default();
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            visibility_timeout_ms: defaults.visibility_timeout.as_millis() as u64,
            batch_size: MAX_BATCH_SIZE,
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
        }
    }
}

impl QueueConfig {
    pub fn settings(&self) -> BackupSettings {
        BackupSettings {
            batch_size: clamp_batch_size(self.batch_size),
            visibility_timeout: Duration::from_millis(self.visibility_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// Records fetched per event log page during a scan
    pub page_size: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub accounts: AccountsConfig,
    /// SQLite file holding the event log and the queue,
    ///  defaults to `db.sqlite` in the config directory
    pub database_path: Option<PathBuf>,
    pub copy: CopyConfig,
    pub queue: QueueConfig,
    pub log: LogConfig,
    /// Default tracing directive, overridden by `RUST_LOG`
    pub log_level: String,
    /// Directory for daily rolling log files (stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            accounts: AccountsConfig::default(),
            database_path: None,
            copy: CopyConfig::default(),
            queue: QueueConfig::default(),
            log: LogConfig::default(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Parsed `log_level`, falling back to `INFO`.
    pub fn tracing_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the config directory (~/.blob-backup)
    pub app_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: Config,
}

impl AppState {
    /// Get the config directory path (custom or default ~/.blob-backup)
    pub fn app_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new config directory
    pub fn init(custom_path: Option<PathBuf>, config: Option<Config>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        if app_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&app_dir)?;

        let config = config.unwrap_or_default();
        let config_path = app_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        let db_path = Self::resolve_db_path(&app_dir, &config);

        Ok(Self {
            app_dir,
            db_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the config directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let app_dir = Self::app_dir(custom_path)?;

        let config_path = app_dir.join(CONFIG_FILE_NAME);
        if !config_path.exists() {
            return Err(StateError::NotInitialized);
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_toml)?;
        let db_path = Self::resolve_db_path(&app_dir, &config);

        Ok(Self {
            app_dir,
            db_path,
            config_path,
            config,
        })
    }

    fn resolve_db_path(app_dir: &std::path::Path, config: &Config) -> PathBuf {
        match &config.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => app_dir.join(path),
            None => app_dir.join(DB_FILE_NAME),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("blob-backup directory not initialized. Run 'blob-backup init' first")]
    NotInitialized,

    #[error("blob-backup directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");

        let state = AppState::init(Some(path.clone()), None).unwrap();
        assert_eq!(state.db_path, path.join(DB_FILE_NAME));
        assert!(state.config_path.exists());

        let loaded = AppState::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.config, Config::default());

        assert!(matches!(
            AppState::init(Some(path), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_grant_minutes_are_clamped() {
        let config = CopyConfig {
            server_copy: true,
            grant_expiry_minutes: i64::MAX,
            grant_clock_skew_minutes: -30,
        };
        let settings = config.settings();
        assert_eq!(settings.grant_expiry, chrono::Duration::minutes(MAX_GRANT_MINUTES));
        assert_eq!(settings.grant_clock_skew, chrono::Duration::zero());
        assert!(settings.grant_window(chrono::Utc::now()).is_some());

        let config = CopyConfig {
            grant_expiry_minutes: 0,
            ..CopyConfig::default()
        };
        assert_eq!(config.settings().grant_expiry, chrono::Duration::minutes(1));

        let defaults = CopyConfig::default().settings();
        assert_eq!(defaults.grant_expiry, chrono::Duration::minutes(60));
        assert_eq!(defaults.grant_clock_skew, chrono::Duration::minutes(5));
    }

    #[test]
    fn test_load_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"

            [copy]
            server_copy = true

            [queue]
            batch_size = 500

            [accounts.backup]
            type = "local"
            path = "/var/backup"
            "#,
        )
        .unwrap();

        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);
        assert_eq!(config.copy.grant_expiry_minutes, 60);
        assert_eq!(
            config.copy.settings().strategy,
            TransferStrategy::ServerCopy
        );
        assert_eq!(config.queue.settings().batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.queue.name, DEFAULT_QUEUE_NAME);
        assert_eq!(config.accounts.source, AccountConfig::Memory);
        assert_eq!(
            config.accounts.backup,
            AccountConfig::Local {
                path: PathBuf::from("/var/backup")
            }
        );
    }

    #[test]
    fn test_relative_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: Some(PathBuf::from("data/log.sqlite")),
            ..Config::default()
        };
        let state = AppState::init(Some(dir.path().to_path_buf()), Some(config)).unwrap();
        assert_eq!(state.db_path, dir.path().join("data/log.sqlite"));
    }
}
