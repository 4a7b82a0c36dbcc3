use serde::de::DeserializeOwned;

pub mod database;
pub mod hash_cache;
pub mod import;
pub mod object_store;
pub(crate) mod utils;

pub use database::DatabaseConfig;
pub use hash_cache::HashCacheConfig;
pub use import::{ImportConfig, SimulatedFailure};
pub use object_store::{ObjectStoreConfig, ObjectStoreMode};

pub fn envy_load<T: DeserializeOwned>(name: &str, prefix: &str) -> T {
    envy_try_load(prefix).unwrap_or_else(|_| {
        panic!("Cannot load config <{}>: {}", name, prefix);
    })
}

pub fn envy_try_load<T: DeserializeOwned>(prefix: &str) -> Result<T, envy::Error> {
    envy::prefixed(prefix).from_env()
}
