use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Longest accepted driver lease, one day.
pub const MAX_LEASE_SECS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub version: String,
    /// SQLite file; defaults to `~/.skuresolve/data/skuresolve.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Rows fetched per page of the batch loop.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Rows of one page resolved at the same time.
    #[serde(default = "default_row_concurrency")]
    pub row_concurrency: usize,
    /// Jobs run at the same time by the worker pool.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_max_rows_per_job")]
    pub max_rows_per_job: usize,
    /// How long a driver's claim on a job stays valid without renewal.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_page_size() -> usize {
    25
}

fn default_row_concurrency() -> usize {
    4
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_max_rows_per_job() -> usize {
    10_000
}

fn default_lease_secs() -> u64 {
    300
}

impl EngineConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database_path: None,
            page_size: default_page_size(),
            row_concurrency: default_row_concurrency(),
            worker_count: default_worker_count(),
            max_rows_per_job: default_max_rows_per_job(),
            lease_secs: default_lease_secs(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Backoff for transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}
