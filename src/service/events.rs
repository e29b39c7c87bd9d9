//! Lifecycle events and their OS signal sources.
//!
//! Signals are translated into [`LifecycleEvent`] values on a channel that a
//! single listener task consumes:
//!
//! | Platform | Signal             | Event       | Registered              |
//! |----------|--------------------|-------------|-------------------------|
//! | Unix     | `SIGHUP`           | `Reload`    | always                  |
//! | Unix     | `SIGINT`/`SIGTERM` | `Terminate` | only with a kill hook   |
//! | Other    | Ctrl-C             | `Terminate` | only with a kill hook   |
//!
//! Without a kill hook the default disposition of `SIGINT`/`SIGTERM` is left
//! in place.

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::debug;

/// An asynchronous request to the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Rotate the log sink.
    Reload,
    /// Stop the workload through the kill hook.
    Terminate,
}

const EVENT_BUFFER: usize = 16;

/// Register the signal handlers and return the event stream.
///
/// Must be called from inside a tokio runtime.
pub fn listen(with_terminate: bool) -> Result<mpsc::Receiver<LifecycleEvent>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    register(tx, with_terminate)?;
    Ok(rx)
}

#[cfg(unix)]
fn register(tx: mpsc::Sender<LifecycleEvent>, with_terminate: bool) -> Result<()> {
    use anyhow::Context;
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;

    if with_terminate {
        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        let term_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let name = tokio::select! {
                    received = interrupt.recv() => received.map(|()| "SIGINT"),
                    received = terminate.recv() => received.map(|()| "SIGTERM"),
                };
                let Some(name) = name else { break };
                debug!(target: "lifecycle", "Received {name}");
                if term_tx.send(LifecycleEvent::Terminate).await.is_err() {
                    break;
                }
            }
        });
    }

    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            debug!(target: "lifecycle", "Received SIGHUP");
            if tx.send(LifecycleEvent::Reload).await.is_err() {
                break;
            }
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn register(tx: mpsc::Sender<LifecycleEvent>, with_terminate: bool) -> Result<()> {
    if with_terminate {
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                debug!(target: "lifecycle", "Received Ctrl-C");
                if tx.send(LifecycleEvent::Terminate).await.is_err() {
                    break;
                }
            }
        });
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sighup_becomes_reload() {
        let mut events = listen(false).unwrap();

        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill").args(["-HUP", &pid]).status().unwrap();
        assert!(status.success());

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(event, Some(LifecycleEvent::Reload));
    }
}
