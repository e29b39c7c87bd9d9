//! Service configuration file (`servicekit.toml`).
//!
//! # File Format
//!
//! ```toml
//! name = "heartbeat"
//! description = "Heartbeat demo service"
//!
//! [options]
//! dependencies = ["After=network.target"]
//! arguments = ["--config", "/opt/heartbeat/servicekit.toml"]
//! environment = { RUST_LOG = "info" }
//! others = ["Restart=always"]
//! pid_file = "/var/run/heartbeat.pid"
//! update_url = "https://releases.example.com/heartbeat/latest.tar.gz"
//! update_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! remove_before_update = ["static"]
//! exclude_files = ["*.log", "conf/*"]
//!
//! [log]
//! file = "~/heartbeat/service.log"
//!
//! [worker]
//! interval_secs = 5
//! message = "still alive"
//! ```
//!
//! Every field is optional. A missing file yields [`ServiceConfig::default`].
//!
//! # Lookup Order
//!
//! 1. An explicit path (`--config`)
//! 2. The `SERVICEKIT_CONFIG` environment variable
//! 3. `servicekit.toml` next to the running executable

use crate::core::ServiceError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SERVICEKIT_CONFIG";

/// File name looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "servicekit.toml";

/// Top-level configuration of a supervised service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Service name used for registration, PID files and the update lock.
    #[serde(default = "default_name")]
    pub name: String,

    /// Human-readable description written into the unit/plist.
    #[serde(default = "default_description")]
    pub description: String,

    /// Registration, runtime and update options.
    #[serde(default)]
    pub options: ServiceOptions,

    /// Log destination.
    #[serde(default)]
    pub log: LogConfig,

    /// Settings for the bundled heartbeat workload.
    #[serde(default)]
    pub worker: WorkerConfig,
}

/// Options shared by registration, the run loop and the update pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Extra dependency lines for the service manager (e.g. `After=network.target`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Arguments passed to the executable when the service manager starts it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,

    /// Environment for the managed process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    /// Raw lines appended to the service definition.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub others: Vec<String>,

    /// Where `run` writes the process id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid_file: Option<String>,

    /// Source of update payloads. Empty disables `update`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_url: String,

    /// Expected SHA-256 of the update payload, hex encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_sha256: Option<String>,

    /// Paths relative to the install root deleted before new files are written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_before_update: Vec<String>,

    /// Globs over relative entry names that an update never writes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_files: Vec<String>,
}

/// Log destination; stderr when `file` is unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// Log file path, `~` and `$VAR` are expanded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Heartbeat workload settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_message")]
    pub message: String,
}

fn default_name() -> String {
    "servicekit".to_string()
}

fn default_description() -> String {
    "servicekit supervised service".to_string()
}

const fn default_interval_secs() -> u64 {
    5
}

fn default_message() -> String {
    "heartbeat".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            description: default_description(),
            options: ServiceOptions::default(),
            log: LogConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            message: default_message(),
        }
    }
}

impl ServiceConfig {
    /// Load from an optional explicit path, falling back to [`Self::default_path`].
    ///
    /// A missing file is not an error and yields the defaults. An explicitly
    /// requested file that does not exist is reported.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                return Err(ServiceError::ConfigError {
                    message: format!("configuration file {} does not exist", path.display()),
                }
                .into());
            }
            return Self::load_from(&path).await;
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path).await,
            _ => Ok(Self::default()),
        }
    }

    /// Load and validate a configuration file.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read service config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse service config from {}", path.display()))?;

        config.validate()?;
        tracing::debug!("Loaded service config '{}' from {}", config.name, path.display());
        Ok(config)
    }

    /// `SERVICEKIT_CONFIG` if set, otherwise `servicekit.toml` beside the executable.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
    }

    /// Check the fields that would otherwise fail much later.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ServiceError::ConfigError {
                message: "service name must not be empty".to_string(),
            }
            .into());
        }

        if self.name.chars().any(|c| c.is_whitespace() || c == '/' || c == '\\') {
            return Err(ServiceError::ConfigError {
                message: format!(
                    "service name '{}' must not contain whitespace or path separators",
                    self.name
                ),
            }
            .into());
        }

        if self.worker.interval_secs == 0 {
            return Err(ServiceError::ConfigError {
                message: "worker.interval_secs must be greater than zero".to_string(),
            }
            .into());
        }

        crate::update::ExclusionSet::new(&self.options.exclude_files)?;
        Ok(())
    }

    /// Expanded PID file path, if configured.
    pub fn pid_file_path(&self) -> Result<Option<PathBuf>> {
        self.options.pid_file.as_deref().map(expand_path).transpose()
    }

    /// Expanded log file path, if configured.
    pub fn log_file_path(&self) -> Result<Option<PathBuf>> {
        self.log.file.as_deref().map(expand_path).transpose()
    }
}

/// Expand `~` and `$VAR` references in a configured path.
pub fn expand_path(raw: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .with_context(|| format!("Failed to expand path '{raw}'"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.name, "servicekit");
        assert_eq!(config.worker.interval_secs, 5);
        assert!(config.options.update_url.is_empty());
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_full_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("servicekit.toml");
        std::fs::write(
            &path,
            r#"
name = "heartbeat"
description = "demo"

[options]
arguments = ["run"]
environment = { RUST_LOG = "debug" }
update_url = "http://127.0.0.1:9000/app"
exclude_files = ["*.log"]
remove_before_update = ["static"]

[worker]
interval_secs = 2
"#,
        )
        .unwrap();

        let config = ServiceConfig::load_from(&path).await.unwrap();
        assert_eq!(config.name, "heartbeat");
        assert_eq!(config.options.arguments, vec!["run"]);
        assert_eq!(config.options.environment.get("RUST_LOG").map(String::as_str), Some("debug"));
        assert_eq!(config.options.exclude_files, vec!["*.log"]);
        assert_eq!(config.worker.interval_secs, 2);
        assert_eq!(config.worker.message, "heartbeat");
    }

    #[tokio::test]
    async fn test_invalid_exclusion_glob_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("servicekit.toml");
        std::fs::write(&path, "[options]\nexclude_files = [\"[unterminated\"]\n").unwrap();

        let err = ServiceConfig::load_from(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ServiceError>(),
            Some(ServiceError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_toml_has_context() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("servicekit.toml");
        std::fs::write(&path, "name = [").unwrap();

        let err = ServiceConfig::load_from(&path).await.unwrap_err();
        assert!(err.to_string().contains("Failed to parse service config"));
    }

    #[tokio::test]
    async fn test_missing_explicit_path_is_error() {
        let temp = TempDir::new().unwrap();
        let result = ServiceConfig::load_with_optional(Some(temp.path().join("nope.toml"))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_env_override_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.toml");
        std::fs::write(&path, "name = \"from-env\"\n").unwrap();

        unsafe {
            std::env::set_var(CONFIG_ENV, &path);
        }
        let config = ServiceConfig::load_with_optional(None).await;
        unsafe {
            std::env::remove_var(CONFIG_ENV);
        }

        assert_eq!(config.unwrap().name, "from-env");
    }

    #[test]
    fn test_invalid_names() {
        let config = ServiceConfig {
            name: "my service".to_string(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        let config = ServiceConfig {
            name: String::new(),
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_path_expansion() {
        unsafe {
            std::env::set_var("SERVICEKIT_TEST_DIR", "/srv/app");
        }
        let config = ServiceConfig {
            options: ServiceOptions {
                pid_file: Some("$SERVICEKIT_TEST_DIR/app.pid".to_string()),
                ..ServiceOptions::default()
            },
            ..ServiceConfig::default()
        };
        let pid = config.pid_file_path().unwrap();
        unsafe {
            std::env::remove_var("SERVICEKIT_TEST_DIR");
        }
        assert_eq!(pid, Some(PathBuf::from("/srv/app/app.pid")));
        assert_eq!(config.log_file_path().unwrap(), None);
    }
}
