use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::time::{SystemTime, UNIX_EPOCH};

use fnv::FnvHasher;

use crate::state::Timestamp;

pub type FnvHashMap<K, T> = HashMap<K, T, BuildHasherDefault<FnvHasher>>;

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_ms() -> Timestamp {
    system_time_ms(SystemTime::now())
}

pub fn system_time_ms(time: SystemTime) -> Timestamp {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
