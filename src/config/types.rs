use serde::{Deserialize, Serialize};

/// Root configuration container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Flush scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Quiet period after the most recent cast before a flush, in
    /// milliseconds (default: 800). Also the minimum spacing between
    /// timer-driven flushes.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Upper bound on how long any vote may sit buffered, in milliseconds
    /// (default: 5000). Not reset by further casts.
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    /// Flush immediately once this many votes are buffered (default: 20).
    /// Also the per-request payload bound.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

/// Sync endpoint and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Batch endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Whole-request timeout in milliseconds (default: 10000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Max retry attempts per flush for transient failures (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff in milliseconds for retry (default: 500).
    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds (default: 10000).
    #[serde(default = "default_retry_backoff_cap_ms")]
    pub retry_backoff_cap_ms: u64,
}

fn default_debounce_ms() -> u64 {
    800
}

fn default_max_interval_ms() -> u64 {
    5000
}

fn default_max_batch_size() -> usize {
    20
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/api/votes/batch".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_base_ms() -> u64 {
    500
}

fn default_retry_backoff_cap_ms() -> u64 {
    10_000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_interval_ms: default_max_interval_ms(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_cap_ms: default_retry_backoff_cap_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schedule: ScheduleConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}
