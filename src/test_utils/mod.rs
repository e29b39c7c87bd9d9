//! Test utilities for servicekit
//!
//! Helpers shared by unit tests and the integration tests under `tests/`
//! (enabled there through the `test-utils` feature):
//! - [`http`]: a local HTTP server with scripted responses for the downloader
//! - [`manager`]: a [`ServiceManager`](crate::platform::ServiceManager) that records calls
//! - [`fixtures`]: archive payload builders and install-tree snapshots
//!
//! # Example
//!
//! ```rust,no_run
//! use servicekit::test_utils::fixtures::PayloadFixture;
//! use servicekit::test_utils::http::{TestResponse, TestServer};
//!
//! # async fn demo() {
//! let payload = PayloadFixture::new().file("a.txt", "A").tar_gz();
//! let server = TestServer::start(TestResponse::ok(payload)).await;
//! println!("serving update at {}", server.url());
//! # }
//! ```

pub mod fixtures;
pub mod http;
pub mod manager;

pub use fixtures::{PayloadFixture, snapshot_tree};
pub use http::{TestResponse, TestServer};
pub use manager::RecordingManager;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` when given, otherwise
/// `RUST_LOG`; with neither, tests run without a subscriber.
///
/// ```bash
/// RUST_LOG=update=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
