use std::time::{SystemTime, UNIX_EPOCH};

use vault_basic_types::EpochMillis;

pub fn millis_since_epoch() -> EpochMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("incorrect system time")
        .as_millis() as EpochMillis
}

pub fn seconds_since_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("incorrect system time")
        .as_secs()
}
