use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    // A clock set before 1970 reads as the epoch
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// Unix time in seconds, as stored with bindings and connection metadata
pub fn current_timestamp_secs() -> i64 {
    since_epoch().as_secs() as i64
}

/// Unix time in milliseconds, as stamped on `request` frames
pub fn current_timestamp_millis() -> u64 {
    since_epoch().as_millis() as u64
}
