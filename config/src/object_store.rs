use serde::Deserialize;

use crate::envy_try_load;

#[derive(Debug, Deserialize, Eq, PartialEq, Clone, Copy)]
pub enum ObjectStoreMode {
    FileBacked,
}

/// Configuration for the object store
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ObjectStoreConfig {
    pub mode: ObjectStoreMode,
    pub file_backed_base_path: String,
    #[serde(default = "ObjectStoreConfig::default_max_retries")]
    pub max_retries: u16,
}

impl ObjectStoreConfig {
    const fn default_max_retries() -> u16 {
        5
    }
}

pub fn load_object_store_config() -> Result<ObjectStoreConfig, envy::Error> {
    envy_try_load("VAULT_OBJECT_STORE_")
}
