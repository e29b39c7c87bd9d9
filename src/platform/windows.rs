//! Windows service control manager strategy, driven through `sc.exe`.
//!
//! `sc.exe stop` returns as soon as the request is queued, so `stop` polls
//! `sc.exe query` until the service reports `STOPPED`.

use super::command::{SystemCommand, require_tool};
use super::{ServiceDefinition, ServiceManager};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(300);
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WindowsScm {
    definition: ServiceDefinition,
    sc: String,
}

impl WindowsScm {
    pub fn new(definition: ServiceDefinition) -> Self {
        Self {
            definition,
            sc: "sc.exe".to_string(),
        }
    }

    pub fn with_sc(mut self, program: impl Into<String>) -> Self {
        self.sc = program.into();
        self
    }

    /// `binPath=` value: quoted executable followed by the arguments.
    pub fn bin_path(&self) -> String {
        let mut bin_path = format!("\"{}\"", self.definition.executable.display());
        for arg in &self.definition.options.arguments {
            bin_path.push(' ');
            bin_path.push_str(arg);
        }
        bin_path
    }

    fn sc<I, S>(&self, args: I) -> SystemCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SystemCommand::new(&self.sc).args(args).with_context(&self.definition.name)
    }

    async fn query(&self) -> Result<String> {
        self.sc(["query".to_string(), self.definition.name.clone()]).execute_stdout().await
    }

    async fn wait_stopped(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
        loop {
            if self.query().await?.contains("STOPPED") {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!(
                    "timeout waiting for service '{}' to go to state STOPPED",
                    self.definition.name
                );
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ServiceManager for WindowsScm {
    fn kind(&self) -> &'static str {
        "sc"
    }

    async fn install(&self) -> Result<()> {
        require_tool(&self.sc, "install")?;
        let name = self.definition.name.clone();
        let display = if self.definition.description.is_empty() {
            name.clone()
        } else {
            self.definition.description.clone()
        };

        self.sc([
            "create".to_string(),
            name.clone(),
            "binPath=".to_string(),
            self.bin_path(),
            "start=".to_string(),
            "auto".to_string(),
            "DisplayName=".to_string(),
            display.clone(),
        ])
        .execute_success()
        .await?;

        if let Err(e) = self.sc(["description".to_string(), name, display]).execute_success().await {
            warn!(target: "platform", "Failed to set service description: {e:#}");
        }
        info!(target: "platform", "Registered service '{}'", self.definition.name);
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        require_tool(&self.sc, "uninstall")?;
        if let Err(e) = self.stop().await {
            warn!(target: "platform", "Ignoring stop failure during uninstall: {e:#}");
        }
        self.sc(["delete".to_string(), self.definition.name.clone()]).execute_success().await
    }

    async fn start(&self) -> Result<()> {
        require_tool(&self.sc, "start")?;
        self.sc(["start".to_string(), self.definition.name.clone()]).execute_success().await
    }

    async fn stop(&self) -> Result<()> {
        require_tool(&self.sc, "stop")?;
        self.sc(["stop".to_string(), self.definition.name.clone()]).execute_success().await?;
        self.wait_stopped().await
    }

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn status(&self) -> Result<String> {
        require_tool(&self.sc, "status")?;
        self.query().await
    }

    async fn reload(&self) -> Result<()> {
        require_tool(&self.sc, "reload")?;
        self.sc(["control".to_string(), self.definition.name.clone(), "paramchange".to_string()])
            .execute_success()
            .await
    }
}
