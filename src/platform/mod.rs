//! Platform service adapters.
//!
//! [`ServiceManager`] is the single seam between servicekit and the operating
//! system's service manager. One strategy exists per platform and is chosen at
//! startup by [`native`]:
//!
//! | Platform | Strategy               | Registration                               |
//! |----------|------------------------|--------------------------------------------|
//! | Linux    | [`systemd::Systemd`]   | `/etc/systemd/system/<name>.service`       |
//! | macOS    | [`launchd::Launchd`]   | `/Library/LaunchDaemons/<name>.plist`      |
//! | Windows  | [`windows::WindowsScm`]| `sc.exe create`                            |
//!
//! The update pipeline uses `stop`, `restart` and `reload`, and treats any
//! error from them as fatal.

pub mod command;
pub mod launchd;
#[cfg(windows)]
pub mod scm;
pub mod systemd;
pub mod windows;

use crate::config::ServiceOptions;
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a service manager needs to register a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    /// Absolute path of the installed executable.
    pub executable: PathBuf,
    pub options: ServiceOptions,
}

impl ServiceDefinition {
    /// Directory holding the executable, used as the working directory.
    pub fn working_dir(&self) -> PathBuf {
        self.executable.parent().map(PathBuf::from).unwrap_or_default()
    }

    /// Name used by the service manager (lower case).
    pub fn unit_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Operations on the OS-level registration of a service.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    /// Short name of the strategy, for logs.
    fn kind(&self) -> &'static str;

    async fn install(&self) -> Result<()>;

    async fn uninstall(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()>;

    /// Human-readable status as reported by the service manager.
    async fn status(&self) -> Result<String>;

    /// Ask the running service to pick up its new binary without a stop/start cycle.
    async fn reload(&self) -> Result<()>;

    /// Whether a restart after replacing the executable runs the new binary.
    ///
    /// When `false` the update pipeline calls [`ServiceManager::reload`] instead.
    fn supports_live_swap(&self) -> bool {
        true
    }
}

/// The strategy for the platform this binary was built for.
pub fn native(definition: ServiceDefinition) -> Result<Arc<dyn ServiceManager>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(systemd::Systemd::new(definition)))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(launchd::Launchd::new(definition)))
    }
    #[cfg(windows)]
    {
        Ok(Arc::new(windows::WindowsScm::new(definition)))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = definition;
        Err(crate::core::ServiceError::PlatformNotSupported {
            operation: format!("service management on {}", std::env::consts::OS),
        }
        .into())
    }
}

/// Render a service-manager template with `tera`.
pub(crate) fn render_template(template: &str, context: &tera::Context) -> Result<String> {
    use anyhow::Context as _;
    tera::Tera::one_off(template, context, false).context("Failed to render service definition")
}
