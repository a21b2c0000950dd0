use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds. Centralized so tests can reason about
/// a single clock source; production code never calls `SystemTime::now()`
/// directly outside of this function.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as i64
}

/// Current Unix time in seconds, used by the Secret Manager's short-lived
/// token expiry math.
pub fn now_secs() -> i64 {
    now_millis() / 1000
}
