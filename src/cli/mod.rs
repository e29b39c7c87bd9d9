//! Command-line front end of the `servicekit` binary.
//!
//! Global flags are parsed with clap; everything after them is a service verb
//! handed to the [`CommandRegistry`](crate::dispatch::CommandRegistry):
//!
//! ```text
//! servicekit [--config <path>] [--verbose | --quiet] [--no-progress] [verb] [args...]
//! ```
//!
//! With no verb the service runs in the foreground, which is how the OS
//! service manager starts it.

mod worker;

pub use worker::heartbeat_service;

use crate::config::ServiceConfig;
use crate::dispatch::{Arity, CommandRegistry};
use crate::logging::{self, LogSink};
use crate::utils::progress::NO_PROGRESS_ENV;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Settings derived from the global flags.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub verbose: bool,
    pub quiet: bool,
    pub no_progress: bool,
    pub config_path: Option<PathBuf>,
}

impl CliConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Export `--no-progress` for the progress bars, which read it from the
    /// environment.
    ///
    /// # Safety
    ///
    /// Writes the process environment. Call it before any other thread is
    /// started, in particular before the tokio runtime is built.
    pub unsafe fn apply_to_env(&self) {
        if self.no_progress {
            // SAFETY: upheld by the caller.
            unsafe { std::env::set_var(NO_PROGRESS_ENV, "1") };
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "servicekit",
    about = "Run, manage and self-update a long-running service",
    version,
    long_about = "servicekit runs a workload as an OS service (systemd, launchd or the Windows \
                  service manager) and can replace its own installation from an update URL.",
    after_help = "Run `servicekit help` to list the service verbs."
)]
pub struct Cli {
    /// Path to the service configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Hide progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    /// Service verb and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl Cli {
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        CliConfig {
            verbose: self.verbose,
            quiet: self.quiet,
            no_progress: self.no_progress,
            config_path: self.config.clone(),
        }
    }

    /// Load the configuration, set up logging and dispatch the verb.
    ///
    /// Expects [`CliConfig::apply_to_env`] to have run already.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        let service_config = ServiceConfig::load_with_optional(config.config_path.clone()).await?;
        let sink = LogSink::from_path(service_config.log_file_path()?)?;
        logging::init(&sink, config.verbose, config.quiet)?;

        let registry = build_registry(&service_config, sink);
        registry.parse_and_run(&self.args).await
    }
}

/// Built-in verbs for the heartbeat service plus a hidden `help`.
pub fn build_registry(config: &ServiceConfig, sink: LogSink) -> CommandRegistry {
    let mut registry = CommandRegistry::for_service(heartbeat_service(config, sink));
    let usage = registry.usage();
    registry.register("help", "Show service commands", Arity::Exact(0), false, move |_| {
        let usage = usage.clone();
        async move {
            println!("{usage}");
            Ok(())
        }
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_and_verb() {
        let cli = Cli::try_parse_from(["servicekit", "--no-progress", "-v", "status"]).unwrap();
        let config = cli.build_config();
        assert!(config.verbose);
        assert!(config.no_progress);
        assert_eq!(cli.args, vec!["status"]);
    }

    #[test]
    fn test_no_verb() {
        let cli = Cli::try_parse_from(["servicekit", "--config", "/etc/app.toml"]).unwrap();
        assert!(cli.args.is_empty());
        assert_eq!(cli.build_config().config_path, Some(PathBuf::from("/etc/app.toml")));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["servicekit", "-v", "-q"]).is_err());
    }

    #[test]
    fn test_verb_arguments_pass_through() {
        let cli = Cli::try_parse_from(["servicekit", "custom", "--flag", "x"]).unwrap();
        assert_eq!(cli.args, vec!["custom", "--flag", "x"]);
    }

    #[test]
    #[serial_test::serial]
    fn test_apply_to_env_exports_only_no_progress() {
        let config = CliConfig {
            no_progress: true,
            config_path: Some(PathBuf::from("/etc/app.toml")),
            ..CliConfig::new()
        };
        unsafe {
            std::env::remove_var(NO_PROGRESS_ENV);
            std::env::remove_var(crate::config::CONFIG_ENV);
            config.apply_to_env();
        }

        assert_eq!(std::env::var(NO_PROGRESS_ENV).as_deref(), Ok("1"));
        assert!(std::env::var(crate::config::CONFIG_ENV).is_err());
        unsafe {
            std::env::remove_var(NO_PROGRESS_ENV);
        }
    }

    #[test]
    fn test_help_is_hidden() {
        let registry = build_registry(&ServiceConfig::default(), LogSink::stderr());
        assert!(registry.contains("help"));
        assert!(!registry.usage().contains("help"));
    }
}
