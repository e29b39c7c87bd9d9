//! Advisory lock serializing updates of one installation.
//!
//! The lock file lives in the updater's lock directory (the system temp
//! directory unless overridden), keyed by service name.
//! Acquisition never waits: a second update fails fast with
//! [`ServiceError::UpdateInProgress`]. The OS releases the lock when the file
//! handle closes, including after a crash.

use crate::core::ServiceError;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Try to take the lock for `name` inside `dir`.
    pub async fn acquire_in(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("servicekit-{name}.update.lock"));
        let lock_path = path.clone();
        let name = name.to_string();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)
                .with_context(|| format!("Failed to open lock file {}", lock_path.display()))?;

            let acquired = FileExt::try_lock_exclusive(&file)
                .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
            if !acquired {
                return Err(ServiceError::UpdateInProgress {
                    name,
                }
                .into());
            }
            Ok(file)
        })
        .await
        .context("Lock task panicked")??;

        debug!(target: "update", "Acquired update lock {}", path.display());
        Ok(Self {
            file,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(target: "update", "Failed to unlock {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_second_acquire_fails_fast() {
        let temp = TempDir::new().unwrap();
        let first = UpdateLock::acquire_in(temp.path(), "app").await.unwrap();

        let err = UpdateLock::acquire_in(temp.path(), "app").await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ServiceError>(),
            Some(&ServiceError::UpdateInProgress {
                name: "app".to_string()
            })
        );

        drop(first);
        assert!(UpdateLock::acquire_in(temp.path(), "app").await.is_ok());
    }

    #[tokio::test]
    async fn test_locks_are_per_service() {
        let temp = TempDir::new().unwrap();
        let _a = UpdateLock::acquire_in(temp.path(), "a").await.unwrap();
        let b = UpdateLock::acquire_in(temp.path(), "b").await.unwrap();
        assert!(b.path().ends_with("servicekit-b.update.lock"));
    }
}
