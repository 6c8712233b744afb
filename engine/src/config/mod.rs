use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::error::EngineError;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Seconds between scheduled sync passes for a user
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Parallel message fetches within one pass
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Recent messages backfilled by a full baseline resync
    #[serde(default = "default_backfill_size")]
    pub recovery_backfill_size: usize,

    /// Page size when listing messages for seeding and backfill
    #[serde(default = "default_seed_page_size")]
    pub seed_page_size: u32,

    /// Provider label standing for the inbox
    #[serde(default = "default_inbox_label")]
    pub inbox_label: String,

    /// Fetch full messages instead of headers and snippet
    #[serde(default)]
    pub fetch_full_messages: bool,

    /// Reconciliation events buffered before senders hand off to a task
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

/// Remote label reconciliation retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailboard")
        .join("mailboard.db")
}

fn default_poll_interval() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_backfill_size() -> usize {
    100
}

fn default_seed_page_size() -> u32 {
    100
}

fn default_inbox_label() -> String {
    "INBOX".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            poll_interval_seconds: default_poll_interval(),
            worker_concurrency: default_worker_concurrency(),
            recovery_backfill_size: default_backfill_size(),
            seed_page_size: default_seed_page_size(),
            inbox_label: default_inbox_label(),
            fetch_full_messages: false,
            queue_capacity: default_queue_capacity(),
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        info!("Loading configuration from: {:?}", path);

        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        if config.worker_concurrency == 0 {
            return Err(EngineError::Config("worker_concurrency must be at least 1".into()));
        }
        if config.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be at least 1".into()));
        }

        Ok(config)
    }

    /// Load from the first default path that exists, or fall back to defaults
    pub fn load_default() -> Result<Self, EngineError> {
        for path in default_config_paths() {
            if path.exists() {
                info!("Found config at: {:?}", path);
                return Self::load(&path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailboard").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("mailboard").join("config.toml"));
    }

    paths
}
