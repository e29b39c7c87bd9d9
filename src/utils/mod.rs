//! Shared utilities
//!
//! - [`fs`] - directory creation and removal for the installation tree
//! - [`progress`] - progress bars and spinners for long-running operations

pub mod fs;
pub mod progress;

pub use fs::{ensure_dir, ensure_parent_dir, remove_path};
pub use progress::{ProgressBar, ProgressStyle};
