//! servicekit - run, manage and self-update a long-running service
//!
//! A program built on servicekit describes its workload as a
//! [`Service`](service::Service): a work function plus an optional kill hook and
//! self-test. The same binary then acts as its own service controller:
//!
//! ```text
//! app install     register with systemd / launchd / the Windows SCM
//! app             run in the foreground (what the service manager invokes)
//! app update      download the release at `update_url` and swap it in
//! ```
//!
//! # Core Modules
//!
//! - [`service`] - the service descriptor, lifecycle run loop and managed control session
//! - [`update`] - download, unpack and install a new release over the running one
//! - [`platform`] - the `ServiceManager` trait and its systemd, launchd and `sc.exe` strategies
//! - [`dispatch`] - command-line verbs and usage text
//!
//! # Supporting Modules
//!
//! - [`cli`] - clap front end of the `servicekit` demo binary
//! - [`config`] - TOML service configuration (`servicekit.toml`)
//! - [`core`] - error types and user-facing error rendering
//! - [`logging`] - tracing subscriber setup and the rotatable log sink
//! - [`utils`] - filesystem helpers and progress bars
//!
//! # Example
//!
//! ```rust,no_run
//! use servicekit::dispatch::CommandRegistry;
//! use servicekit::service::Service;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let service = Service::new("heartbeat").exec(|| async {
//!     loop {
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!     }
//! });
//!
//! let args: Vec<String> = std::env::args().skip(1).collect();
//! CommandRegistry::for_service(service).parse_and_run(&args).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod logging;
pub mod platform;
pub mod service;
pub mod update;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
