//! Self-update pipeline.
//!
//! [`Updater::run`] downloads a new release from `update_url` and installs it
//! over the directory holding the running executable:
//!
//! 1. Validate the source URL and exclusion globs.
//! 2. Download the whole payload (mandatory `content-length`) and verify the
//!    optional SHA-256.
//! 3. Unpack it into entries, or treat it as a replacement executable.
//! 4. Take the per-service update lock and stop the service.
//! 5. Recover asides left by an interrupted update, delete the
//!    `remove_before_update` paths.
//! 6. Write every non-excluded entry in archive order. The running executable
//!    is renamed aside before its replacement is written.
//! 7. Restore `0755` on the executable, restart (or reload where the platform
//!    cannot restart into a swapped binary) and delete the aside copy.
//!
//! Nothing on disk changes before step 4. Failures after it are fatal and not
//! rolled back; the installation then holds the old version or the new one
//! plus at most one aside file that the next update recovers.

pub mod archive;
pub mod download;
pub mod exclude;
pub mod lock;
pub mod swap;
pub mod verification;

pub use archive::{PayloadEntry, into_entries};
pub use download::Downloader;
pub use exclude::ExclusionSet;
pub use lock::UpdateLock;
pub use verification::ChecksumVerifier;

use crate::config::ServiceOptions;
use crate::core::ServiceError;
use crate::platform::ServiceManager;
use crate::service::Service;
use crate::utils::fs::{ensure_dir, ensure_parent_dir, remove_path};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an update changed, as names relative to the install root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub written: Vec<String>,
    pub skipped: Vec<String>,
    pub removed: Vec<String>,
}

pub struct Updater {
    name: String,
    options: ServiceOptions,
    executable: PathBuf,
    manager: Arc<dyn ServiceManager>,
    downloader: Downloader,
    lock_dir: PathBuf,
}

impl Updater {
    pub fn new(
        name: impl Into<String>,
        options: ServiceOptions,
        executable: impl Into<PathBuf>,
        manager: Arc<dyn ServiceManager>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            executable: executable.into(),
            manager,
            downloader: Downloader::default(),
            lock_dir: std::env::temp_dir(),
        }
    }

    pub fn with_downloader(mut self, downloader: Downloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Directory holding the update lock file.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub async fn run(&self) -> Result<UpdateReport> {
        let url = self.options.update_url.trim();
        if url.is_empty() {
            return Err(ServiceError::NoUpdateSource.into());
        }
        let exclusions = ExclusionSet::new(&self.options.exclude_files)?;

        let executable = self.absolute_executable()?;
        let root = executable
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("Executable {} has no parent directory", executable.display()))?;
        let exe_name = executable
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("Executable {} has no file name", executable.display()))?;

        info!(target: "update", "Updating '{}' from {url}", self.name);
        let payload = self.downloader.fetch(url).await?;
        if let Some(expected) = self.options.update_sha256.as_deref() {
            ChecksumVerifier::verify(&payload, expected)?;
        }
        let entries = into_entries(payload, &exe_name)?;
        debug!(target: "update", "Payload holds {} entries", entries.len());

        let _lock = UpdateLock::acquire_in(&self.lock_dir, &self.name).await?;

        info!(target: "update", "Stopping '{}' before installing", self.name);
        self.manager.stop().await.with_context(|| format!("Failed to stop '{}'", self.name))?;

        if let Err(e) = swap::recover_stale_asides(&executable).await {
            warn!(target: "update", "Failed to recover earlier update leftovers: {e:#}");
        }

        let mut report = UpdateReport {
            removed: self.remove_before_update(&root, &executable).await,
            ..UpdateReport::default()
        };

        let aside = swap::today_aside_path(&executable);
        for entry in &entries {
            if exclusions.is_excluded(&entry.name) {
                debug!(target: "update", "Excluded {}", entry.name);
                report.skipped.push(entry.name.clone());
                continue;
            }

            let target = root.join(&entry.name);
            if entry.is_dir {
                ensure_dir(&target).await?;
            } else {
                self.install_file(&target, &executable, &aside, &entry.body).await?;
            }
            report.written.push(entry.name.clone());
        }

        if executable.exists() {
            swap::set_mode(&executable, swap::EXECUTABLE_MODE).await?;
        }

        if self.manager.supports_live_swap() {
            info!(target: "update", "Restarting '{}'", self.name);
            self.manager.restart().await.with_context(|| format!("Failed to restart '{}'", self.name))?;
        } else {
            info!(target: "update", "Reloading '{}'", self.name);
            self.manager.reload().await.with_context(|| format!("Failed to reload '{}'", self.name))?;
        }

        if aside.exists() {
            if let Err(e) = tokio::fs::remove_file(&aside).await {
                warn!(target: "update", "Failed to remove {}: {e}", aside.display());
            }
        }

        info!(
            target: "update",
            "Updated '{}': {} written, {} skipped, {} removed",
            self.name,
            report.written.len(),
            report.skipped.len(),
            report.removed.len()
        );
        Ok(report)
    }

    fn absolute_executable(&self) -> Result<PathBuf> {
        if self.executable.is_absolute() {
            return Ok(self.executable.clone());
        }
        Ok(std::env::current_dir()
            .context("Failed to resolve working directory")?
            .join(&self.executable))
    }

    /// Delete the configured paths. Failures are logged and skipped.
    async fn remove_before_update(&self, root: &Path, executable: &Path) -> Vec<String> {
        let mut removed = Vec::new();
        for raw in &self.options.remove_before_update {
            let name = match archive::normalize_entry_name(raw) {
                Ok(Some(name)) => name,
                Ok(None) => {
                    warn!(target: "update", "Refusing to remove the install root ({raw:?})");
                    continue;
                }
                Err(e) => {
                    warn!(target: "update", "Skipping removal of {raw:?}: {e:#}");
                    continue;
                }
            };

            let target = root.join(&name);
            if target == executable {
                debug!(target: "update", "Keeping running executable {}", target.display());
                continue;
            }
            match remove_path(&target).await {
                Ok(true) => {
                    debug!(target: "update", "Removed {}", target.display());
                    removed.push(name);
                }
                Ok(false) => {}
                Err(e) => warn!(target: "update", "{e:#}"),
            }
        }
        removed
    }

    async fn install_file(
        &self,
        target: &Path,
        executable: &Path,
        aside: &Path,
        body: &[u8],
    ) -> Result<()> {
        ensure_parent_dir(target).await?;
        let previous_mode = swap::existing_mode(target).await;

        let mode = if target == executable {
            if target.exists() {
                swap::rename_aside(executable, aside).await?;
            }
            previous_mode.unwrap_or(swap::EXECUTABLE_MODE)
        } else {
            previous_mode.unwrap_or(swap::DEFAULT_FILE_MODE)
        };

        swap::write_file(target, body, mode).await
    }
}

impl Service {
    /// Download and install the release at `update_url`, then restart.
    ///
    /// An empty `update_url` fails with [`ServiceError::NoUpdateSource`]
    /// before the platform service manager is consulted.
    pub async fn update(&self) -> Result<UpdateReport> {
        if self.get_options().update_url.trim().is_empty() {
            return Err(ServiceError::NoUpdateSource.into());
        }
        Updater::new(
            self.name(),
            self.get_options().clone(),
            self.executable_path()?,
            self.service_manager()?,
        )
        .run()
        .await
    }
}
