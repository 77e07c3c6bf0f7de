//! File system helpers with atomic write semantics.
//!
//! Cache partitions and the config file are rewritten in full on every save.
//! Writing to a temporary sibling and renaming it into place means a reader
//! either sees the previous file or the new one, never a torn write.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;

/// Ensures a directory exists, creating it and its parents if needed.
///
/// # Errors
///
/// Returns an error if the path exists but is not a directory, or if the
/// directory cannot be created.
pub async fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display())),
        Err(_) => fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display())),
    }
}

/// Atomically writes `content` to `path`.
///
/// The parent directory is created when missing. Concurrent writers to the
/// same path must be serialized by the caller since they share the temporary
/// file name.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the temp file cannot
/// be written or renamed.
pub async fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent).await?;
    }

    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Reads a file to a string, returning `None` when it does not exist.
///
/// # Errors
///
/// Returns an error for any failure other than the file being absent.
pub async fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}
