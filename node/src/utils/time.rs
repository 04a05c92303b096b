use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in milliseconds. Lease expiries and the `.used`
/// marker files use this unit.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

