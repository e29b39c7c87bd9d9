//! Platform-managed run loop driven by control requests.
//!
//! Service control managers (the Windows SCM in particular) do not deliver
//! signals; they send control requests and expect status reports back. The
//! caller owns both channels and bridges them to the platform API, so the run
//! loop itself needs no global state.

use super::{Completion, Service, spawn_work};
use crate::core::ServiceError;
use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A request from the service control manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Report the current status again.
    Interrogate,
    Stop,
    Shutdown,
    /// Any request code the run loop does not handle.
    Other(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

/// A status update sent to the service control manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub status: ServiceStatus,
    /// Whether stop and shutdown requests are accepted in this state.
    pub accepts_stop: bool,
    /// 0 on success, 1 when the run ended with an error. Only set on `Stopped`.
    pub exit_code: u32,
}

impl StatusReport {
    const fn new(status: ServiceStatus, accepts_stop: bool) -> Self {
        Self {
            status,
            accepts_stop,
            exit_code: 0,
        }
    }
}

async fn report(status: &mpsc::Sender<StatusReport>, update: StatusReport) {
    if status.send(update).await.is_err() {
        debug!(target: "lifecycle", "Status receiver closed, dropping {:?}", update.status);
    }
}

impl Service {
    /// Run the work function under a service control manager.
    ///
    /// Reports `StartPending` then `Running`, answers `Interrogate` with the
    /// current status and ends on `Stop`/`Shutdown` or when the work function
    /// returns. A stop request runs the kill hook, whose result becomes the
    /// run result; without a kill hook the stop succeeds immediately. Exactly
    /// one `Stopped` report is sent at the end.
    pub async fn run_managed(
        &self,
        mut requests: mpsc::Receiver<ControlRequest>,
        status: mpsc::Sender<StatusReport>,
    ) -> Result<()> {
        let exec = self.exec.clone().ok_or(ServiceError::NoExecutor)?;

        report(&status, StatusReport::new(ServiceStatus::StartPending, false)).await;

        let (completion, mut outcome) = Completion::new();
        spawn_work(exec, completion.clone());

        let current = StatusReport::new(ServiceStatus::Running, true);
        report(&status, current).await;
        info!(target: "lifecycle", "Service '{}' running under service control", self.name);

        let result = loop {
            tokio::select! {
                settled = &mut outcome => {
                    break settled.unwrap_or_else(|_| Err(anyhow!("run outcome was never settled")));
                }
                request = requests.recv() => match request {
                    Some(ControlRequest::Interrogate) => report(&status, current).await,
                    Some(request @ (ControlRequest::Stop | ControlRequest::Shutdown)) => {
                        info!(target: "lifecycle", "Received {request:?} request");
                        report(&status, StatusReport::new(ServiceStatus::StopPending, false)).await;
                        let Some(kill) = &self.kill else {
                            break Ok(());
                        };
                        match completion.claim() {
                            Some(_claim) => break kill().await,
                            // The work function settled first; its result stands.
                            None => {
                                break (&mut outcome)
                                    .await
                                    .unwrap_or_else(|_| Err(anyhow!("run outcome was never settled")));
                            }
                        }
                    }
                    Some(ControlRequest::Other(code)) => {
                        warn!(target: "lifecycle", "Unexpected control request #{code}");
                    }
                    None => {
                        debug!(target: "lifecycle", "Control channel closed, waiting for the work function");
                        break (&mut outcome)
                            .await
                            .unwrap_or_else(|_| Err(anyhow!("run outcome was never settled")));
                    }
                },
            }
        };

        let mut stopped = StatusReport::new(ServiceStatus::Stopped, false);
        stopped.exit_code = u32::from(result.is_err());
        report(&status, stopped).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::time::Duration;

    fn pending_exec() -> impl Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static {
        || Box::pin(std::future::pending())
    }

    async fn collect(mut rx: mpsc::Receiver<StatusReport>) -> Vec<StatusReport> {
        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        reports
    }

    #[tokio::test]
    async fn test_stop_runs_kill_hook() {
        let service = Service::new("app")
            .exec(pending_exec())
            .kill(|| async { Err(anyhow!("kill failed")) });

        let (req_tx, req_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = mpsc::channel(16);
        req_tx.send(ControlRequest::Interrogate).await.unwrap();
        req_tx.send(ControlRequest::Other(128)).await.unwrap();
        req_tx.send(ControlRequest::Stop).await.unwrap();

        let err = service.run_managed(req_rx, status_tx).await.unwrap_err();
        assert_eq!(err.to_string(), "kill failed");

        let reports = collect(status_rx).await;
        let states: Vec<_> = reports.iter().map(|r| r.status).collect();
        assert_eq!(
            states,
            vec![
                ServiceStatus::StartPending,
                ServiceStatus::Running,
                ServiceStatus::Running,
                ServiceStatus::StopPending,
                ServiceStatus::Stopped,
            ]
        );
        assert_eq!(reports.last().unwrap().exit_code, 1);
        assert_eq!(states.iter().filter(|s| **s == ServiceStatus::Stopped).count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_kill_is_ok() {
        let service = Service::new("app").exec(pending_exec());
        let (req_tx, req_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = mpsc::channel(16);
        req_tx.send(ControlRequest::Shutdown).await.unwrap();

        assert!(service.run_managed(req_rx, status_tx).await.is_ok());
        let reports = collect(status_rx).await;
        assert_eq!(reports.last().unwrap().status, ServiceStatus::Stopped);
        assert_eq!(reports.last().unwrap().exit_code, 0);
    }

    #[tokio::test]
    async fn test_work_exit_ends_managed_run() {
        let service = Service::new("app").exec(|| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(anyhow!("worker crashed"))
        });
        let (_req_tx, req_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = mpsc::channel(16);

        let err = service.run_managed(req_rx, status_tx).await.unwrap_err();
        assert_eq!(err.to_string(), "worker crashed");
        let reports = collect(status_rx).await;
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[2].status, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_panicking_work_ends_managed_run() {
        let service = Service::new("app")
            .exec(|| async { panic!("work blew up") })
            .kill(|| async { Ok(()) });
        let (_req_tx, req_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = mpsc::channel(16);

        let result =
            tokio::time::timeout(Duration::from_secs(5), service.run_managed(req_rx, status_tx))
                .await
                .expect("managed run did not end after the work function panicked");
        assert!(result.unwrap_err().to_string().starts_with("work function panicked"));

        let reports = collect(status_rx).await;
        assert_eq!(reports.last().unwrap().status, ServiceStatus::Stopped);
        assert_eq!(reports.last().unwrap().exit_code, 1);
    }

    #[tokio::test]
    async fn test_managed_without_exec() {
        let (_req_tx, req_rx) = mpsc::channel(1);
        let (status_tx, _status_rx) = mpsc::channel(1);
        let err = Service::new("app").run_managed(req_rx, status_tx).await.unwrap_err();
        assert_eq!(err.downcast_ref::<ServiceError>(), Some(&ServiceError::NoExecutor));
    }
}
