use serde::Deserialize;

use crate::envy_try_load;

/// Configuration of the asset database facade.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Device whose assets this database tracks; scopes the tree file to
    /// `devices/{device_id}/tree.dat`.
    pub device_id: String,
    /// When set, tree mutations are suppressed and saves are rejected.
    #[serde(default)]
    pub readonly: bool,
}

pub fn load_database_config() -> Result<DatabaseConfig, envy::Error> {
    envy_try_load("VAULT_DATABASE_")
}
