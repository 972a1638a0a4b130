//! Scoped string-keyed cache with per-entry TTL.
//!
//! Every access names its [`CacheScope`] so chat, user, and service data never
//! share a flat namespace by accident. Values are strings; typed callers go
//! through [`get_json`] / [`set_json`] so serde runs once at this boundary.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    atomic_io::write_snapshot_atomic,
    time_utils::{current_unix_timestamp_ms, expiry_from_ttl, is_expired_unix_ms},
};

const FILE_CACHE_SCHEMA_VERSION: u32 = 1;

/// Namespace an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    Service,
    Chat(i64),
    User(i64),
}

impl CacheScope {
    /// Returns the flat storage key for `name` inside this scope.
    pub fn key(self, name: &str) -> String {
        match self {
            Self::Service => format!("svc:{name}"),
            Self::Chat(chat_id) => format!("chat:{chat_id}:{name}"),
            Self::User(user_id) => format!("user:{user_id}:{name}"),
        }
    }
}

/// Trait contract for keyed get/set/TTL storage.
pub trait KeyedCache: Send + Sync {
    fn get(&self, scope: CacheScope, name: &str) -> Result<Option<String>>;

    fn set(&self, scope: CacheScope, name: &str, value: &str, ttl: Option<Duration>)
        -> Result<()>;

    fn remove(&self, scope: CacheScope, name: &str) -> Result<bool>;
}

/// Reads and decodes a JSON value stored under `name`.
pub fn get_json<T>(cache: &dyn KeyedCache, scope: CacheScope, name: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = cache.get(scope, name)? else {
        return Ok(None);
    };
    let value = serde_json::from_str::<T>(&raw)
        .with_context(|| format!("failed to decode cached value {}", scope.key(name)))?;
    Ok(Some(value))
}

/// Encodes `value` as JSON and stores it under `name`.
pub fn set_json<T>(
    cache: &dyn KeyedCache,
    scope: CacheScope,
    name: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let raw = serde_json::to_string(value)
        .with_context(|| format!("failed to encode cached value {}", scope.key(name)))?;
    cache.set(scope, name, &raw, ttl)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CacheEntry {
    value: String,
    #[serde(default)]
    expires_unix_ms: Option<u64>,
}

impl CacheEntry {
    fn is_live(&self, now_unix_ms: u64) -> bool {
        !is_expired_unix_ms(self.expires_unix_ms, now_unix_ms)
    }
}

/// Process-local cache, used by tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryKeyedCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryKeyedCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyedCache for InMemoryKeyedCache {
    fn get(&self, scope: CacheScope, name: &str) -> Result<Option<String>> {
        let now = current_unix_timestamp_ms();
        let entries = lock_unpoisoned(&self.entries);
        Ok(entries
            .get(&scope.key(name))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(
        &self,
        scope: CacheScope,
        name: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = current_unix_timestamp_ms();
        let mut entries = lock_unpoisoned(&self.entries);
        entries.insert(
            scope.key(name),
            CacheEntry {
                value: value.to_string(),
                expires_unix_ms: expiry_from_ttl(ttl, now),
            },
        );
        Ok(())
    }

    fn remove(&self, scope: CacheScope, name: &str) -> Result<bool> {
        let mut entries = lock_unpoisoned(&self.entries);
        Ok(entries.remove(&scope.key(name)).is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileCacheState {
    schema_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

impl Default for FileCacheState {
    fn default() -> Self {
        Self {
            schema_version: FILE_CACHE_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// JSON-file backed cache; every write persists the whole table atomically.
#[derive(Debug)]
pub struct FileKeyedCache {
    path: PathBuf,
    state: Mutex<FileCacheState>,
}

impl FileKeyedCache {
    /// Loads the cache file, dropping expired entries. Unreadable or
    /// mismatched-schema files start fresh.
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read cache file {}", path.display()))?;
            match serde_json::from_str::<FileCacheState>(&raw) {
                Ok(state) => state,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "failed to parse cache file; starting fresh"
                    );
                    FileCacheState::default()
                }
            }
        } else {
            FileCacheState::default()
        };

        if state.schema_version != FILE_CACHE_SCHEMA_VERSION {
            tracing::warn!(
                path = %path.display(),
                expected = FILE_CACHE_SCHEMA_VERSION,
                found = state.schema_version,
                "unsupported cache schema; starting fresh"
            );
            state = FileCacheState::default();
        }

        let now = current_unix_timestamp_ms();
        state.entries.retain(|_, entry| entry.is_live(now));
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &FileCacheState) -> Result<()> {
        let mut payload =
            serde_json::to_string_pretty(state).context("failed to serialize cache state")?;
        payload.push('\n');
        write_snapshot_atomic(&self.path, payload.as_bytes())
            .with_context(|| format!("failed to write cache file {}", self.path.display()))
    }
}

impl KeyedCache for FileKeyedCache {
    fn get(&self, scope: CacheScope, name: &str) -> Result<Option<String>> {
        let now = current_unix_timestamp_ms();
        let state = lock_unpoisoned(&self.state);
        Ok(state
            .entries
            .get(&scope.key(name))
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn set(
        &self,
        scope: CacheScope,
        name: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let now = current_unix_timestamp_ms();
        let mut state = lock_unpoisoned(&self.state);
        state.entries.retain(|_, entry| entry.is_live(now));
        state.entries.insert(
            scope.key(name),
            CacheEntry {
                value: value.to_string(),
                expires_unix_ms: expiry_from_ttl(ttl, now),
            },
        );
        self.persist(&state)
    }

    fn remove(&self, scope: CacheScope, name: &str) -> Result<bool> {
        let mut state = lock_unpoisoned(&self.state);
        let removed = state.entries.remove(&scope.key(name)).is_some();
        if removed {
            self.persist(&state)?;
        }
        Ok(removed)
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
