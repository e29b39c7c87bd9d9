//! Progress indicators for long-running servicekit operations.
//!
//! Wraps `indicatif` with consistent styling. Bars are hidden when the
//! `SERVICEKIT_NO_PROGRESS` environment variable is set (the CLI sets it for
//! `--no-progress`), so scripted runs and service-manager logs stay clean.
//!
//! # Examples
//!
//! ```rust
//! use servicekit::utils::progress::ProgressBar;
//!
//! let progress = ProgressBar::new_download(2048);
//! progress.set_prefix("update");
//! progress.inc(1024);
//! progress.inc(1024);
//! progress.finish_and_clear();
//! ```

use indicatif::{ProgressBar as IndicatifBar, ProgressStyle as IndicatifStyle};

/// Environment variable that hides every progress indicator.
pub const NO_PROGRESS_ENV: &str = "SERVICEKIT_NO_PROGRESS";

fn is_progress_disabled() -> bool {
    std::env::var(NO_PROGRESS_ENV).is_ok()
}

/// A progress bar with servicekit styling.
///
/// Cheap to clone; clones drive the same bar.
#[derive(Clone)]
pub struct ProgressBar {
    inner: IndicatifBar,
}

impl ProgressBar {
    /// Creates a byte-oriented bar for transfers of `total_bytes`.
    pub fn new_download(total_bytes: u64) -> Self {
        let bar = if is_progress_disabled() {
            IndicatifBar::hidden()
        } else {
            let bar = IndicatifBar::new(total_bytes);
            bar.set_style(ProgressStyle::download());
            bar
        };
        Self {
            inner: bar,
        }
    }

    /// A bar that never renders.
    pub fn hidden() -> Self {
        Self {
            inner: IndicatifBar::hidden(),
        }
    }

    /// Sets the label shown before the bar.
    pub fn set_prefix(&self, prefix: impl Into<String>) {
        self.inner.set_prefix(prefix.into());
    }

    /// Advances the bar by `delta` units.
    pub fn inc(&self, delta: u64) {
        self.inner.inc(delta);
    }

    /// Current position of the bar.
    pub fn position(&self) -> u64 {
        self.inner.position()
    }

    /// Finishes the bar and removes it from the terminal.
    pub fn finish_and_clear(&self) {
        self.inner.finish_and_clear();
    }

    /// Whether the bar is suppressed.
    pub fn is_hidden(&self) -> bool {
        self.inner.is_hidden()
    }
}

/// Predefined styles.
pub struct ProgressStyle;

impl ProgressStyle {
    /// `{prefix} [{bar}] {bytes}/{total_bytes} ({eta})`, used by the update downloader.
    pub fn download() -> IndicatifStyle {
        IndicatifStyle::default_bar()
            .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .map(|style| style.progress_chars("━╸━"))
            .unwrap_or_else(|_| IndicatifStyle::default_bar())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_bar_tracks_bytes() {
        let pb = ProgressBar::new_download(4096);
        pb.set_prefix("Downloading");
        pb.inc(1024);
        pb.inc(3072);
        assert_eq!(pb.position(), 4096);
        pb.finish_and_clear();
    }

    #[test]
    fn test_hidden_bar() {
        let pb = ProgressBar::hidden();
        pb.inc(1);
        assert!(pb.is_hidden());
    }
}
