//! servicekit - heartbeat demo service with install, control and self-update verbs

use anyhow::{Context, Result};
use clap::Parser;
use servicekit::cli;
use servicekit::core::error::user_friendly_error;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.build_config();
    // SAFETY: still single-threaded, the runtime is built below.
    unsafe { config.apply_to_env() };

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the async runtime")?;
    match runtime.block_on(cli.execute_with_config(config)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let error_ctx = user_friendly_error(e);
            error_ctx.display();
            std::process::exit(1);
        }
    }
}
