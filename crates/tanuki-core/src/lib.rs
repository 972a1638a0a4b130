//! Foundational utilities shared across tanuki crates.
//!
//! Provides atomic file writes, time helpers, and the scoped keyed cache that
//! backs correlation records, nickname mappings, settings, and reply state.

pub mod atomic_io;
pub mod keyed_cache;
pub mod time_utils;

pub use atomic_io::write_snapshot_atomic;
pub use keyed_cache::{
    get_json, set_json, CacheScope, FileKeyedCache, InMemoryKeyedCache, KeyedCache,
};
pub use time_utils::{current_unix_timestamp_ms, expiry_from_ttl, is_expired_unix_ms};

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;
    use std::time::Duration;

    use super::*;

    #[test]
    fn is_expired_unix_ms_respects_none_and_bounds() {
        let now = current_unix_timestamp_ms();
        assert!(!is_expired_unix_ms(None, now));
        assert!(is_expired_unix_ms(Some(now), now));
        assert!(is_expired_unix_ms(Some(now.saturating_sub(1)), now));
        assert!(!is_expired_unix_ms(Some(now.saturating_add(1)), now));
    }

    #[test]
    fn expiry_from_ttl_offsets_now() {
        assert_eq!(expiry_from_ttl(None, 10), None);
        assert_eq!(expiry_from_ttl(Some(Duration::from_secs(2)), 10), Some(2_010));
    }

    #[test]
    fn write_snapshot_atomic_replaces_previous_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("cache.json");
        write_snapshot_atomic(&path, b"{\"version\":1}").expect("first write");
        write_snapshot_atomic(&path, b"{\"version\":2}").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "{\"version\":2}");

        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn write_snapshot_atomic_rejects_directories() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        assert!(write_snapshot_atomic(tempdir.path(), b"{}").is_err());
    }
}
