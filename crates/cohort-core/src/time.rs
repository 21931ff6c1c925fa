use std::time::{SystemTime, UNIX_EPOCH};

/// Current UTC time as Unix seconds. A clock before the epoch reads as 0.
pub fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
