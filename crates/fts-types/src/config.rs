//! Configuration loading for the full-text indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/fts-indexer/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::entity::EntityKind;
use crate::error::FtsError;

/// Indexer loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerSettings {
    /// Cursor key under which the event-log watermark is persisted
    #[serde(default = "default_index_key")]
    pub index_key: String,

    /// Maximum log records fetched per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum batches per invocation
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,

    /// Another batch runs only while the backlog exceeds
    /// `backlog_factor * batch_size`
    #[serde(default = "default_backlog_factor")]
    pub backlog_factor: u64,

    /// Recompute exact percent-complete every N batches (0 disables)
    #[serde(default = "default_exact_progress_every")]
    pub exact_progress_every: usize,

    /// Files larger than this are indexed without content
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Entity kinds enumerated by the full-scan loader
    #[serde(default = "default_kinds")]
    pub kinds: Vec<EntityKind>,
}

fn default_index_key() -> String {
    "fulltext".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_repetitions() -> usize {
    5
}

fn default_backlog_factor() -> u64 {
    2
}

fn default_exact_progress_every() -> usize {
    10
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_kinds() -> Vec<EntityKind> {
    EntityKind::ALL.to_vec()
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            index_key: default_index_key(),
            batch_size: default_batch_size(),
            repetitions: default_repetitions(),
            backlog_factor: default_backlog_factor(),
            exact_progress_every: default_exact_progress_every(),
            max_file_size: default_max_file_size(),
            kinds: default_kinds(),
        }
    }
}

impl IndexerSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.repetitions == 0 {
            return Err("repetitions must be > 0".to_string());
        }
        if self.kinds.is_empty() {
            return Err("kinds must not be empty".to_string());
        }
        Ok(())
    }
}

/// Scheduled invocation and run-lock settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Cron expression, 6-field (default: every 30 seconds)
    #[serde(default = "default_cron")]
    pub cron: String,

    /// IANA timezone for the cron expression
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Maximum random delay before a scheduled run
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// How long a waiting run blocks for the run lock
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,

    /// How long shutdown waits for an in-flight run
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_jitter_secs() -> u64 {
    5
}

fn default_lock_wait_secs() -> u64 {
    10
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            cron: default_cron(),
            timezone: default_timezone(),
            jitter_secs: default_jitter_secs(),
            lock_wait_secs: default_lock_wait_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB primary store directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the Tantivy index directory
    #[serde(default = "default_index_path")]
    pub index_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub indexer: IndexerSettings,

    #[serde(default)]
    pub schedule: ScheduleSettings,
}

fn data_dir(leaf: &str) -> String {
    ProjectDirs::from("", "", "fts-indexer")
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(".").join(leaf))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("db")
}

fn default_index_path() -> String {
    data_dir("index")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            index_path: default_index_path(),
            log_level: default_log_level(),
            indexer: IndexerSettings::default(),
            schedule: ScheduleSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/fts-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (FTS_*, nested with "__")
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, FtsError> {
        let config_dir = ProjectDirs::from("", "", "fts-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| FtsError::Config(e.to_string()))?
            .set_default("index_path", default_index_path())
            .map_err(|e| FtsError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| FtsError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // FTS_DB_PATH, FTS_INDEXER__BATCH_SIZE, FTS_SCHEDULE__CRON, ...
        builder = builder.add_source(
            Environment::with_prefix("FTS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| FtsError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| FtsError::Config(e.to_string()))?;

        settings.indexer.validate().map_err(FtsError::Config)?;
        Ok(settings)
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in index_path to the home directory
    pub fn expanded_index_path(&self) -> PathBuf {
        expand_home(&self.index_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
