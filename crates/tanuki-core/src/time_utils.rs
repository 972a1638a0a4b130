use std::time::Duration;

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns true when `expires_unix_ms` is present and no longer in the future.
pub fn is_expired_unix_ms(expires_unix_ms: Option<u64>, now_unix_ms: u64) -> bool {
    matches!(expires_unix_ms, Some(value) if value <= now_unix_ms)
}

/// Converts an optional TTL into an absolute expiry relative to `now_unix_ms`.
pub fn expiry_from_ttl(ttl: Option<Duration>, now_unix_ms: u64) -> Option<u64> {
    ttl.map(|ttl| {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        now_unix_ms.saturating_add(ttl_ms)
    })
}
