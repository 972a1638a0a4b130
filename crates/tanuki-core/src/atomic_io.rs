use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{bail, Context, Result};

static SNAPSHOT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn snapshot_temp_path(path: &Path) -> Result<PathBuf> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        bail!("snapshot path '{}' has no file name", path.display());
    };
    let sequence = SNAPSHOT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    Ok(path.with_file_name(format!(
        ".{file_name}.{}.{sequence}.partial",
        std::process::id()
    )))
}

/// Replaces `path` with `bytes`. The data is flushed to disk before the rename,
/// so a crash leaves either the previous snapshot or the new one.
pub fn write_snapshot_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.is_dir() {
        bail!("snapshot path '{}' is a directory", path.display());
    }
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let temp_path = snapshot_temp_path(path)?;
    let written = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .with_context(|| format!("failed to write {}", temp_path.display()));
    if let Err(error) = written {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error);
    }

    std::fs::rename(&temp_path, path).with_context(|| {
        format!(
            "failed to move snapshot {} into {}",
            temp_path.display(),
            path.display()
        )
    })
}
