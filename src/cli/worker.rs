//! The heartbeat workload run by the `servicekit` binary.

use crate::config::ServiceConfig;
use crate::logging::LogSink;
use crate::service::Service;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// A [`Service`] that logs `worker.message` every `worker.interval_secs`
/// until its kill hook fires. The self-test re-validates the configuration.
pub fn heartbeat_service(config: &ServiceConfig, sink: LogSink) -> Service {
    let (stop_tx, stop_rx) = watch::channel(false);
    let interval = Duration::from_secs(config.worker.interval_secs);
    let message = config.worker.message.clone();
    let checked = config.clone();

    Service::from_config(config)
        .logger(sink)
        .exec(move || {
            let mut stop = stop_rx.clone();
            let message = message.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                let mut beats: u64 = 0;
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            beats += 1;
                            info!(target: "worker", beats, "{message}");
                        }
                        changed = stop.changed() => {
                            if changed.is_err() || *stop.borrow() {
                                break;
                            }
                        }
                    }
                }
                info!(target: "worker", "Stopped after {beats} beats");
                Ok(())
            }
        })
        .kill(move || {
            let stop = stop_tx.clone();
            async move {
                stop.send_replace(true);
                Ok(())
            }
        })
        .test_exec(move || {
            let config = checked.clone();
            async move { config.validate() }
        })
}
