use serde::Deserialize;

use crate::envy_try_load;

/// Configuration of the on-disk hash cache.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HashCacheConfig {
    #[serde(default = "HashCacheConfig::default_file_path")]
    pub file_path: String,
    /// Worker processes open the cache read-only; saves become no-ops.
    #[serde(default)]
    pub read_only: bool,
    /// Save after this many newly inserted entries during a scan.
    #[serde(default = "HashCacheConfig::default_save_interval")]
    pub save_interval: usize,
}

impl HashCacheConfig {
    fn default_file_path() -> String {
        ".db/hash-cache-x.dat".to_string()
    }

    const fn default_save_interval() -> usize {
        100
    }
}

impl Default for HashCacheConfig {
    fn default() -> Self {
        Self {
            file_path: Self::default_file_path(),
            read_only: false,
            save_interval: Self::default_save_interval(),
        }
    }
}

pub fn load_hash_cache_config() -> Result<HashCacheConfig, envy::Error> {
    envy_try_load("VAULT_HASH_CACHE_")
}
