use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use tanuki_core::{FileKeyedCache, KeyedCache};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `--log-filter` when both are set.
pub(crate) fn init_tracing(default_filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn open_state_cache(state_dir: &Path, cache_path: &Path) -> Result<Arc<dyn KeyedCache>> {
    std::fs::create_dir_all(state_dir)
        .with_context(|| format!("failed to create state dir {}", state_dir.display()))?;
    let cache = FileKeyedCache::load(cache_path.to_path_buf())?;
    tracing::info!(path = %cache.path().display(), "state cache loaded");
    Ok(Arc::new(cache))
}
