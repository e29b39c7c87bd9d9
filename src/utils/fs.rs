//! Filesystem helpers for the installation tree.

use crate::core::ServiceError;
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

/// Ensures a directory exists, creating it and all parents if necessary.
///
/// A non-directory already occupying `path` is a
/// [`ServiceError::DirectoryConflict`].
pub async fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(ServiceError::DirectoryConflict {
            path: path.display().to_string(),
        }
        .into()),
        Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(path)
            .await
            .with_context(|| format!("Failed to create directory: {}", path.display())),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to inspect directory: {}", path.display()))
        }
    }
}

/// Ensures that the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent).await,
        _ => Ok(()),
    }
}

/// Remove a file or a whole directory tree.
///
/// Returns `false` when nothing existed at `path`.
pub async fn remove_path(path: &Path) -> Result<bool> {
    let metadata = match fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("Failed to inspect {}", path.display())),
    };

    if metadata.is_dir() {
        fs::remove_dir_all(path)
            .await
            .with_context(|| format!("Failed to remove directory {}", path.display()))?;
    } else {
        fs::remove_file(path)
            .await
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(true)
}
