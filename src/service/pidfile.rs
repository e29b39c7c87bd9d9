//! PID file written for the duration of a run.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A written PID file, removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current process id to `path`.
    ///
    /// Parent directories are created with mode 0775 and the file with 0644.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create PID directory {}", parent.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o775));
            }
        }

        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
                .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
        }

        debug!(target: "lifecycle", "Wrote PID file {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Best-effort variant: failures are logged and yield `None`.
    pub fn try_create(path: &Path) -> Option<Self> {
        match Self::create(path) {
            Ok(pid_file) => Some(pid_file),
            Err(e) => {
                warn!(target: "lifecycle", "{e:#}");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(target: "lifecycle", "Failed to remove PID file {}: {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pid_file_lifecycle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run/app.pid");

        let pid_file = PidFile::create(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), std::process::id().to_string());
        assert_eq!(pid_file.path(), path);

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn test_try_create_failure_is_none() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        assert!(PidFile::try_create(&blocker.join("app.pid")).is_none());
    }
}
