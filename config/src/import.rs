use serde::Deserialize;

use crate::envy_try_load;

/// Failure injection points for chaos testing. Wired through configuration so
/// that production code never probes process globals.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    /// Fail roughly 10% of import-file tasks after upload.
    AddFile,
}

/// Configuration of the import pipeline.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ImportConfig {
    /// Number of worker tasks hashing and importing files in parallel.
    #[serde(default = "ImportConfig::default_worker_count")]
    pub worker_count: usize,
    /// Trailing-edge debounce interval for database-update batches.
    #[serde(default = "ImportConfig::default_throttle_interval_ms")]
    pub throttle_interval_ms: u64,
    /// Attempts when taking the write lock outside the throttled flusher
    /// (the flusher itself always uses a single attempt and re-queues).
    #[serde(default = "ImportConfig::default_lock_max_attempts")]
    pub lock_max_attempts: usize,
    /// Transient storage I/O retry budget.
    #[serde(default = "ImportConfig::default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "ImportConfig::default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Reject duplicate file names on `add_file` instead of absorbing them.
    /// Enabled by test harnesses.
    #[serde(default)]
    pub validate_unique_names: bool,
    #[serde(default)]
    pub simulate_failure: Option<SimulatedFailure>,
}

impl ImportConfig {
    const fn default_worker_count() -> usize {
        4
    }

    const fn default_throttle_interval_ms() -> u64 {
        1_000
    }

    const fn default_lock_max_attempts() -> usize {
        5
    }

    const fn default_retry_max_attempts() -> usize {
        3
    }

    const fn default_retry_base_delay_ms() -> u64 {
        1_500
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            worker_count: Self::default_worker_count(),
            throttle_interval_ms: Self::default_throttle_interval_ms(),
            lock_max_attempts: Self::default_lock_max_attempts(),
            retry_max_attempts: Self::default_retry_max_attempts(),
            retry_base_delay_ms: Self::default_retry_base_delay_ms(),
            validate_unique_names: false,
            simulate_failure: None,
        }
    }
}

pub fn load_import_config() -> Result<ImportConfig, envy::Error> {
    envy_try_load("VAULT_IMPORT_")
}
