//! In-place replacement of the running executable.
//!
//! The running binary is never overwritten. It is renamed to a sibling
//! `<exe>.<YYYY-MM-DD>.tmp` first, and the new content is written at the
//! original path, so the install path lacks an executable only for the
//! duration of one rename. The aside copy is deleted after the restart.
//!
//! An update interrupted between the rename and the write leaves the aside
//! behind; [`recover_stale_asides`] puts it back (or removes it) at the start
//! of the next update.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Mode of a freshly written regular file.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
/// Mode of the executable.
pub const EXECUTABLE_MODE: u32 = 0o755;

/// `<exe>.<YYYY-MM-DD>.tmp` next to `executable`.
pub fn aside_path(executable: &Path, date: NaiveDate) -> PathBuf {
    let mut name = executable.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.tmp", date.format("%Y-%m-%d")));
    executable.with_file_name(name)
}

/// Aside path for an update happening today.
pub fn today_aside_path(executable: &Path) -> PathBuf {
    aside_path(executable, chrono::Local::now().date_naive())
}

/// Date encoded in an aside file name belonging to `exe_name`.
fn aside_date(exe_name: &str, candidate: &str) -> Option<NaiveDate> {
    let middle = candidate.strip_prefix(exe_name)?.strip_prefix('.')?.strip_suffix(".tmp")?;
    NaiveDate::parse_from_str(middle, "%Y-%m-%d").ok()
}

/// Aside copies of `executable` left in its directory, newest first.
pub async fn find_asides(executable: &Path) -> Result<Vec<PathBuf>> {
    let Some(dir) = executable.parent() else {
        return Ok(Vec::new());
    };
    let exe_name = executable.file_name().unwrap_or_default().to_string_lossy().into_owned();

    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(date) = aside_date(&exe_name, &name) {
            found.push((date, entry.path()));
        }
    }
    found.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Restore or discard asides left by an interrupted update.
///
/// If the executable is missing, the newest aside is renamed back into place.
/// Every other aside is deleted. Failures are logged.
pub async fn recover_stale_asides(executable: &Path) -> Result<()> {
    let mut asides = find_asides(executable).await?;
    if asides.is_empty() {
        return Ok(());
    }

    if !executable.exists() {
        let newest = asides.remove(0);
        warn!(
            target: "update",
            "Executable {} missing, restoring {}",
            executable.display(),
            newest.display()
        );
        fs::rename(&newest, executable).await.with_context(|| {
            format!("Failed to restore {} from {}", executable.display(), newest.display())
        })?;
    }

    for stale in asides {
        match fs::remove_file(&stale).await {
            Ok(()) => info!(target: "update", "Removed stale {}", stale.display()),
            Err(e) => warn!(target: "update", "Failed to remove stale {}: {e}", stale.display()),
        }
    }
    Ok(())
}

/// Move the running executable out of the way.
pub async fn rename_aside(executable: &Path, aside: &Path) -> Result<()> {
    debug!(target: "update", "Renaming {} to {}", executable.display(), aside.display());
    fs::rename(executable, aside).await.with_context(|| {
        format!("Failed to move {} aside to {}", executable.display(), aside.display())
    })
}

/// Permission bits of `path`, if it exists.
pub async fn existing_mode(path: &Path) -> Option<u32> {
    let metadata = fs::metadata(path).await.ok()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(metadata.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = metadata;
        None
    }
}

/// Write `body` to `target` and apply `mode` (Unix only).
pub async fn write_file(target: &Path, body: &[u8], mode: u32) -> Result<()> {
    fs::write(target, body)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;
    set_mode(target, mode).await
}

/// Apply permission bits (Unix only).
pub async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_aside_name() {
        let aside = aside_path(Path::new("/opt/app/heartbeat"), date("2026-03-09"));
        assert_eq!(aside, PathBuf::from("/opt/app/heartbeat.2026-03-09.tmp"));
    }

    #[test]
    fn test_aside_date_parsing() {
        assert_eq!(aside_date("app", "app.2026-01-02.tmp"), Some(date("2026-01-02")));
        assert_eq!(aside_date("app", "app.log"), None);
        assert_eq!(aside_date("app", "app.not-a-date.tmp"), None);
        assert_eq!(aside_date("app", "other.2026-01-02.tmp"), None);
    }

    #[tokio::test]
    async fn test_recover_restores_newest_when_executable_missing() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("app");
        std::fs::write(aside_path(&exe, date("2026-01-01")), b"older").unwrap();
        std::fs::write(aside_path(&exe, date("2026-02-01")), b"newer").unwrap();

        recover_stale_asides(&exe).await.unwrap();

        assert_eq!(std::fs::read(&exe).unwrap(), b"newer");
        assert!(find_asides(&exe).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_deletes_asides_when_executable_present() {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("app");
        std::fs::write(&exe, b"current").unwrap();
        std::fs::write(aside_path(&exe, date("2026-01-01")), b"old").unwrap();
        std::fs::write(temp.path().join("app.log"), b"unrelated").unwrap();

        recover_stale_asides(&exe).await.unwrap();

        assert_eq!(std::fs::read(&exe).unwrap(), b"current");
        assert!(find_asides(&exe).await.unwrap().is_empty());
        assert!(temp.path().join("app.log").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_file_sets_mode() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("tool");
        write_file(&target, b"#!/bin/sh\n", EXECUTABLE_MODE).await.unwrap();
        assert_eq!(existing_mode(&target).await, Some(0o755));
        assert_eq!(existing_mode(&temp.path().join("missing")).await, None);
    }
}
