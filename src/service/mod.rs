//! The service descriptor and its lifecycle run loop.
//!
//! A [`Service`] bundles the work function with everything needed to manage
//! it as an OS service: an optional kill hook and self-test, the
//! [`ServiceOptions`], the log sink and the platform [`ServiceManager`].
//!
//! # Run loop
//!
//! ```text
//! Idle ──run()──▶ Running ──Terminate + kill hook──▶ Stopping ──▶ Terminated
//!                    │                                               ▲
//!                    └────────────── work function returns ──────────┘
//! ```
//!
//! - The work function runs on its own task.
//! - One listener task consumes [`LifecycleEvent`]s. `Reload` rotates the log
//!   sink, `Terminate` runs the kill hook (when configured) whose result
//!   supersedes the work function's.
//! - The loop blocks on a [`Completion`] slot. The first settle wins.
//! - Nothing is ever cancelled forcibly: without a kill hook, termination
//!   requests are logged and the work function decides when the run ends.
//!
//! # Examples
//!
//! ```rust,no_run
//! use servicekit::service::Service;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = Service::new("heartbeat")
//!     .description("Heartbeat demo")
//!     .exec(|| async {
//!         loop {
//!             tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!             tracing::info!("still alive");
//!         }
//!     })
//!     .kill(|| async { Ok(()) });
//!
//! service.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod completion;
pub mod control;
pub mod events;
pub mod pidfile;

pub use completion::{Claim, Completion};
pub use control::{ControlRequest, ServiceStatus, StatusReport};
pub use events::LifecycleEvent;
pub use pidfile::PidFile;

use crate::config::{ServiceConfig, ServiceOptions, expand_path};
use crate::core::ServiceError;
use crate::logging::LogSink;
use crate::platform::{self, ServiceDefinition, ServiceManager};
use anyhow::{Context, Result, anyhow};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A work function, kill hook or self-test.
pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// One logical service per process.
#[derive(Clone)]
pub struct Service {
    name: String,
    description: String,
    options: ServiceOptions,
    exec: Option<Hook>,
    kill: Option<Hook>,
    test_exec: Option<Hook>,
    logger: Option<LogSink>,
    manager: Option<Arc<dyn ServiceManager>>,
    executable: Option<PathBuf>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("options", &self.options)
            .field("has_exec", &self.exec.is_some())
            .field("has_kill", &self.kill.is_some())
            .field("has_test", &self.test_exec.is_some())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// A service with the given name and default options.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            options: ServiceOptions::default(),
            exec: None,
            kill: None,
            test_exec: None,
            logger: None,
            manager: None,
            executable: None,
        }
    }

    /// Name, description and options taken from a configuration file.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.name.clone())
            .description(config.description.clone())
            .options(config.options.clone())
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn options(mut self, options: ServiceOptions) -> Self {
        self.options = options;
        self
    }

    /// The work function. Required by [`Service::run`].
    pub fn exec<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.exec = Some(hook(f));
        self
    }

    /// Invoked on termination; its result becomes the run result.
    pub fn kill<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.kill = Some(hook(f));
        self
    }

    /// Self-test run by the `test` command.
    pub fn test_exec<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.test_exec = Some(hook(f));
        self
    }

    /// Sink rotated on `Reload`.
    pub fn logger(mut self, sink: LogSink) -> Self {
        self.logger = Some(sink);
        self
    }

    /// Use `manager` instead of the platform's native service manager.
    pub fn manager(mut self, manager: Arc<dyn ServiceManager>) -> Self {
        self.manager = Some(manager);
        self
    }

    /// Treat `path` as the installed executable instead of the running one.
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_options(&self) -> &ServiceOptions {
        &self.options
    }

    pub fn log_sink(&self) -> Option<&LogSink> {
        self.logger.as_ref()
    }

    pub fn has_kill(&self) -> bool {
        self.kill.is_some()
    }

    /// Absolute path of the installed executable.
    pub fn executable_path(&self) -> Result<PathBuf> {
        let path = match &self.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("Failed to resolve current executable")?,
        };
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(std::env::current_dir().context("Failed to resolve working directory")?.join(path))
        }
    }

    /// What the platform service manager needs to register this service.
    pub fn definition(&self) -> Result<ServiceDefinition> {
        Ok(ServiceDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            executable: self.executable_path()?,
            options: self.options.clone(),
        })
    }

    /// The configured manager, or the native one for this platform.
    pub fn service_manager(&self) -> Result<Arc<dyn ServiceManager>> {
        match &self.manager {
            Some(manager) => Ok(Arc::clone(manager)),
            None => platform::native(self.definition()?),
        }
    }

    /// Run until the work function returns or a termination request is
    /// handled by the kill hook.
    ///
    /// Fails with [`ServiceError::NoExecutor`] before any signal handler or
    /// PID file is set up when no work function is configured. On Windows a
    /// process started by the service control manager runs under
    /// [`Service::run_managed`] instead.
    pub async fn run(&self) -> Result<()> {
        if self.exec.is_none() {
            return Err(ServiceError::NoExecutor.into());
        }
        #[cfg(windows)]
        if let Some(result) = platform::scm::run_as_service(self).await? {
            return result;
        }
        let events = events::listen(self.kill.is_some())?;
        self.run_with_events(events).await
    }

    /// The run loop driven by an arbitrary event stream.
    pub async fn run_with_events(&self, events: mpsc::Receiver<LifecycleEvent>) -> Result<()> {
        let exec = self.exec.clone().ok_or(ServiceError::NoExecutor)?;

        let _pid_file = self.pid_file();
        let (completion, outcome) = Completion::new();

        info!(target: "lifecycle", "Service '{}' running (pid {})", self.name, std::process::id());

        spawn_work(exec, completion.clone());

        let listener = tokio::spawn(listen_events(
            events,
            completion,
            self.kill.clone(),
            self.logger.clone(),
        ));

        let result = outcome.await.unwrap_or_else(|_| Err(anyhow!("run outcome was never settled")));
        listener.abort();

        match &result {
            Ok(()) => info!(target: "lifecycle", "Service '{}' stopped", self.name),
            Err(e) => warn!(target: "lifecycle", "Service '{}' stopped with error: {e:#}", self.name),
        }
        result
    }

    /// Run the self-test.
    ///
    /// Prints `Test pass.`, `Test failed: ...` (and returns the error) or
    /// `No test provided.`.
    pub async fn test(&self) -> Result<()> {
        let Some(test_exec) = &self.test_exec else {
            println!("No test provided.");
            return Ok(());
        };

        match test_exec().await {
            Ok(()) => {
                println!("Test pass.");
                Ok(())
            }
            Err(e) => {
                println!("Test failed: {e:#}");
                Err(e)
            }
        }
    }

    pub async fn install(&self) -> Result<()> {
        self.service_manager()?.install().await
    }

    pub async fn uninstall(&self) -> Result<()> {
        self.service_manager()?.uninstall().await
    }

    pub async fn start(&self) -> Result<()> {
        self.service_manager()?.start().await
    }

    pub async fn stop(&self) -> Result<()> {
        self.service_manager()?.stop().await
    }

    pub async fn restart(&self) -> Result<()> {
        self.service_manager()?.restart().await
    }

    pub async fn status(&self) -> Result<String> {
        self.service_manager()?.status().await
    }

    fn pid_file(&self) -> Option<PidFile> {
        let raw = self.options.pid_file.as_deref()?;
        match expand_path(raw) {
            Ok(path) => PidFile::try_create(&path),
            Err(e) => {
                warn!(target: "lifecycle", "{e:#}");
                None
            }
        }
    }
}

/// Run `exec` on its own task and settle `slot` with its result.
///
/// A panic in the work function settles the run with an error instead of
/// leaving the slot open.
fn spawn_work(exec: Hook, slot: Completion<Result<()>>) {
    tokio::spawn(async move {
        let result = match tokio::spawn(async move { exec().await }).await {
            Ok(result) => result,
            Err(e) => Err(anyhow!("work function panicked: {e}")),
        };
        if !slot.settle(result) {
            debug!(target: "lifecycle", "Work function returned after the run was settled");
        }
    });
}

async fn listen_events(
    mut events: mpsc::Receiver<LifecycleEvent>,
    completion: Completion<Result<()>>,
    kill: Option<Hook>,
    logger: Option<LogSink>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Reload => {
                let Some(logger) = &logger else {
                    debug!(target: "lifecycle", "Reload requested, no log sink to rotate");
                    continue;
                };
                match logger.rotate() {
                    Ok(()) => info!(target: "lifecycle", "Log sink rotated"),
                    Err(e) => warn!(target: "lifecycle", "Log rotation failed: {e:#}"),
                }
            }
            LifecycleEvent::Terminate => {
                let Some(kill) = &kill else {
                    info!(target: "lifecycle", "Termination requested without a kill hook, waiting for the work function");
                    continue;
                };
                let Some(claim) = completion.claim() else {
                    debug!(target: "lifecycle", "Termination requested after the run was settled");
                    continue;
                };
                info!(target: "lifecycle", "Termination requested, running kill hook");
                claim.settle(kill().await);
            }
        }
    }
}
