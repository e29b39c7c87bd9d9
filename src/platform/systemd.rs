//! systemd strategy.
//!
//! Installs a unit file rendered from [`UNIT_TEMPLATE`] and drives it through
//! `systemctl`.

use super::command::{SystemCommand, require_tool};
use super::{ServiceDefinition, ServiceManager, render_template};
use crate::core::ServiceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, warn};

/// Default location of system unit files.
pub const UNIT_DIR: &str = "/etc/systemd/system";

const UNIT_TEMPLATE: &str = "[Unit]
Description={{ description }}
{% for line in dependencies %}{{ line }}
{% endfor %}
[Service]
WorkingDirectory={{ working_dir }}
ExecStart={{ executable }}{% for arg in arguments %} {{ arg }}{% endfor %}{% for key, value in environment %}
Environment={{ key }}={{ value }}{% endfor %}
{% for line in others %}{{ line }}
{% endfor %}
[Install]
WantedBy=multi-user.target
";

pub struct Systemd {
    definition: ServiceDefinition,
    unit_dir: PathBuf,
    systemctl: String,
}

impl Systemd {
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            unit_dir: PathBuf::from(UNIT_DIR),
            systemctl: "systemctl".to_string(),
        }
    }

    /// Write unit files somewhere other than [`UNIT_DIR`].
    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    /// Use a different `systemctl` binary.
    pub fn with_systemctl(mut self, program: impl Into<String>) -> Self {
        self.systemctl = program.into();
        self
    }

    pub fn unit_file(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.definition.unit_name()))
    }

    /// The unit file contents for this service.
    pub fn render_unit(&self) -> Result<String> {
        let def = &self.definition;
        let mut context = tera::Context::new();
        context.insert("description", &def.description);
        context.insert("dependencies", &def.options.dependencies);
        context.insert("working_dir", &def.working_dir().display().to_string());
        context.insert("executable", &def.executable.display().to_string());
        context.insert("arguments", &def.options.arguments);
        context.insert("environment", &def.options.environment);
        context.insert("others", &def.options.others);
        render_template(UNIT_TEMPLATE, &context)
    }

    fn systemctl(&self, action: &str) -> SystemCommand {
        SystemCommand::new(&self.systemctl)
            .args([action.to_string(), self.definition.unit_name()])
            .with_context(&self.definition.name)
    }
}

#[async_trait]
impl ServiceManager for Systemd {
    fn kind(&self) -> &'static str {
        "systemd"
    }

    async fn install(&self) -> Result<()> {
        let unit_file = self.unit_file();
        if unit_file.exists() {
            return Err(ServiceError::AlreadyInstalled {
                name: unit_file.display().to_string(),
            }
            .into());
        }
        require_tool(&self.systemctl, "install")?;

        let unit = self.render_unit()?;
        tokio::fs::write(&unit_file, unit)
            .await
            .with_context(|| format!("Failed to write unit file {}", unit_file.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&unit_file, std::fs::Permissions::from_mode(0o644))
                .await
                .with_context(|| format!("Failed to set permissions on {}", unit_file.display()))?;
        }

        self.systemctl("enable").execute_success().await?;
        info!(target: "platform", "Installed {}", unit_file.display());
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        let unit_file = self.unit_file();
        if !unit_file.exists() {
            return Err(ServiceError::NotInstalled {
                name: self.definition.name.clone(),
            }
            .into());
        }

        if let Err(e) = self.systemctl("stop").execute_success().await {
            warn!(target: "platform", "Ignoring stop failure during uninstall: {e:#}");
        }
        self.systemctl("disable").execute_success().await?;
        tokio::fs::remove_file(&unit_file)
            .await
            .with_context(|| format!("Failed to remove unit file {}", unit_file.display()))?;
        info!(target: "platform", "Removed {}", unit_file.display());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.systemctl("start").execute_success().await
    }

    async fn stop(&self) -> Result<()> {
        self.systemctl("stop").execute_success().await
    }

    async fn restart(&self) -> Result<()> {
        self.systemctl("restart").execute_success().await
    }

    async fn status(&self) -> Result<String> {
        // `systemctl status` exits non-zero for inactive units; the text is still the answer.
        let output = self.systemctl("status").output().await?;
        Ok(output.stdout.trim_end().to_string())
    }

    async fn reload(&self) -> Result<()> {
        SystemCommand::new(&self.systemctl)
            .args(["kill".to_string(), "--signal=HUP".to_string(), self.definition.unit_name()])
            .with_context(&self.definition.name)
            .execute_success()
            .await
    }
}
