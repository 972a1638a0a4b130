//! GitLab identity to chat mention mapping.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tanuki_core::{CacheScope, KeyedCache};

use crate::markup::bold;

pub const NICKNAME_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Clone)]
pub struct NicknameCache {
    cache: Arc<dyn KeyedCache>,
}

impl NicknameCache {
    pub fn new(cache: Arc<dyn KeyedCache>) -> Self {
        Self { cache }
    }

    fn lookup(&self, identity: &str) -> Option<String> {
        if identity.trim().is_empty() {
            return None;
        }
        match self
            .cache
            .get(CacheScope::Service, &format!("nick_map_{identity}"))
        {
            Ok(handle) => handle.filter(|handle| !handle.is_empty()),
            Err(error) => {
                tracing::debug!(%error, identity, "nickname lookup failed; treating as miss");
                None
            }
        }
    }

    /// Renders an actor mention without any network I/O.
    pub fn mention(&self, name: &str, email: &str) -> String {
        match self.lookup(name).or_else(|| self.lookup(email)) {
            Some(handle) => format!("@{handle}"),
            None => bold(name),
        }
    }

    pub fn remember(&self, username: &str, email: &str, handle: &str) -> Result<()> {
        for identity in [username, email] {
            if identity.trim().is_empty() {
                continue;
            }
            self.cache.set(
                CacheScope::Service,
                &format!("nick_map_{identity}"),
                handle,
                Some(NICKNAME_TTL),
            )?;
        }
        Ok(())
    }
}
