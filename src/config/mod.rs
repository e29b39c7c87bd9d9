//! Configuration for servicekit services.
//!
//! A single TOML file describes the service (name, description), the options
//! used by registration, the run loop and the update pipeline, the log
//! destination and the demo workload. See [`service_config`] for the format and
//! lookup order.

pub mod service_config;

pub use service_config::{
    CONFIG_ENV, CONFIG_FILE_NAME, LogConfig, ServiceConfig, ServiceOptions, WorkerConfig,
    expand_path,
};
