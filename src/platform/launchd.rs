//! launchd strategy (macOS).
//!
//! launchd keeps the mapped binary of a `KeepAlive` job, so a restart right
//! after an in-place swap is not reliable. [`Launchd::supports_live_swap`]
//! returns `false` and updates go through `launchctl kickstart -k` instead.

use super::command::{SystemCommand, require_tool};
use super::{ServiceDefinition, ServiceManager, render_template};
use crate::core::ServiceError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

pub const DAEMON_DIR: &str = "/Library/LaunchDaemons";

const PLIST_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
  <dict>
    <key>Label</key>
    <string>{{ label | escape_xml }}</string>
    <key>ProgramArguments</key>
    <array>
      <string>{{ executable | escape_xml }}</string>{% for arg in arguments %}
      <string>{{ arg | escape_xml }}</string>{% endfor %}
    </array>
    <key>WorkingDirectory</key>
    <string>{{ working_dir | escape_xml }}</string>{% if environment %}
    <key>EnvironmentVariables</key>
    <dict>{% for key, value in environment %}
      <key>{{ key | escape_xml }}</key>
      <string>{{ value | escape_xml }}</string>{% endfor %}
    </dict>{% endif %}
    <key>KeepAlive</key>
    <true/>
  </dict>
</plist>
"#;

pub struct Launchd {
    definition: ServiceDefinition,
    daemon_dir: PathBuf,
    launchctl: String,
    restart_pause: Duration,
}

impl Launchd {
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            daemon_dir: PathBuf::from(DAEMON_DIR),
            launchctl: "launchctl".to_string(),
            restart_pause: Duration::from_secs(1),
        }
    }

    pub fn with_daemon_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.daemon_dir = dir.into();
        self
    }

    pub fn with_launchctl(mut self, program: impl Into<String>) -> Self {
        self.launchctl = program.into();
        self
    }

    /// Pause between stop and start in [`ServiceManager::restart`].
    pub const fn with_restart_pause(mut self, pause: Duration) -> Self {
        self.restart_pause = pause;
        self
    }

    pub fn plist_file(&self) -> PathBuf {
        self.daemon_dir.join(format!("{}.plist", self.definition.name))
    }

    pub fn render_plist(&self) -> Result<String> {
        let def = &self.definition;
        let mut context = tera::Context::new();
        context.insert("label", &def.unit_name());
        context.insert("executable", &def.executable.display().to_string());
        context.insert("arguments", &def.options.arguments);
        context.insert("working_dir", &def.working_dir().display().to_string());
        context.insert("environment", &def.options.environment);
        render_template(PLIST_TEMPLATE, &context)
    }

    fn launchctl(&self, action: &str) -> SystemCommand {
        SystemCommand::new(&self.launchctl)
            .arg(action)
            .arg(self.plist_file().display().to_string())
            .with_context(&self.definition.name)
    }
}

#[async_trait]
impl ServiceManager for Launchd {
    fn kind(&self) -> &'static str {
        "launchd"
    }

    async fn install(&self) -> Result<()> {
        let plist = self.plist_file();
        if plist.exists() {
            return Err(ServiceError::AlreadyInstalled {
                name: plist.display().to_string(),
            }
            .into());
        }

        let content = self.render_plist()?;
        tokio::fs::write(&plist, content)
            .await
            .with_context(|| format!("Failed to write {}", plist.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&plist, std::fs::Permissions::from_mode(0o644))
                .await
                .with_context(|| format!("Failed to set permissions on {}", plist.display()))?;
        }
        info!(target: "platform", "Installed {}", plist.display());
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        let plist = self.plist_file();
        if !plist.exists() {
            return Err(ServiceError::NotInstalled {
                name: self.definition.name.clone(),
            }
            .into());
        }
        if let Err(e) = self.stop().await {
            warn!(target: "platform", "Ignoring stop failure during uninstall: {e:#}");
        }
        tokio::fs::remove_file(&plist)
            .await
            .with_context(|| format!("Failed to remove {}", plist.display()))?;
        info!(target: "platform", "Removed {}", plist.display());
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        require_tool(&self.launchctl, "start")?;
        self.launchctl("load").execute_success().await
    }

    async fn stop(&self) -> Result<()> {
        require_tool(&self.launchctl, "stop")?;
        self.launchctl("unload").execute_success().await
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(self.restart_pause).await;
        self.start().await
    }

    async fn status(&self) -> Result<String> {
        require_tool(&self.launchctl, "status")?;
        SystemCommand::new(&self.launchctl)
            .args(["list".to_string(), self.definition.unit_name()])
            .with_context(&self.definition.name)
            .execute_stdout()
            .await
    }

    async fn reload(&self) -> Result<()> {
        require_tool(&self.launchctl, "reload")?;
        SystemCommand::new(&self.launchctl)
            .args([
                "kickstart".to_string(),
                "-k".to_string(),
                format!("system/{}", self.definition.unit_name()),
            ])
            .with_context(&self.definition.name)
            .execute_success()
            .await
    }

    fn supports_live_swap(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceOptions;
    use tempfile::TempDir;

    fn definition() -> ServiceDefinition {
        ServiceDefinition {
            name: "Heartbeat".to_string(),
            description: "demo".to_string(),
            executable: PathBuf::from("/opt/heart & beat/heartbeat"),
            options: ServiceOptions {
                arguments: vec!["run".to_string()],
                ..ServiceOptions::default()
            },
        }
    }

    #[test]
    fn test_render_plist_escapes_and_lists_arguments() {
        let plist = Launchd::new(definition()).render_plist().unwrap();
        assert!(plist.contains("<string>heartbeat</string>"));
        assert!(plist.contains("<string>/opt/heart &amp; beat/heartbeat</string>"));
        assert!(plist.contains("<string>run</string>"));
        assert!(plist.contains("<key>KeepAlive</key>"));
        assert!(!plist.contains("EnvironmentVariables"));
    }

    #[test]
    fn test_no_live_swap() {
        assert!(!Launchd::new(definition()).supports_live_swap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_install_uninstall() {
        let temp = TempDir::new().unwrap();
        let launchd = Launchd::new(definition())
            .with_daemon_dir(temp.path())
            .with_launchctl("true")
            .with_restart_pause(Duration::from_millis(1));

        launchd.install().await.unwrap();
        assert!(temp.path().join("Heartbeat.plist").exists());
        assert!(launchd.install().await.is_err());
        launchd.restart().await.unwrap();
        launchd.uninstall().await.unwrap();
        assert!(!temp.path().join("Heartbeat.plist").exists());
    }
}
