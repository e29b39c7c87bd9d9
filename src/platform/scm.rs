//! Binding of the run loop to the Windows service control manager.
//!
//! A process started by the SCM must call the service control dispatcher and
//! report its status, otherwise the SCM gives up on it (error 1053). The
//! dispatcher calls back into [`service_main`] on its own thread, which drives
//! [`Service::run_managed`] on the caller's tokio runtime and relays every
//! [`StatusReport`] back to the SCM.

use crate::service::{ControlRequest, Service, ServiceStatus as RunStatus, StatusReport};
use anyhow::{Context, Result, anyhow};
use std::ffi::OsString;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
    ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
use windows_service::{define_windows_service, service_dispatcher};

/// `StartServiceCtrlDispatcher` fails with this code in an interactive process.
const ERROR_FAILED_SERVICE_CONTROLLER_CONNECT: i32 = 1063;

const PENDING_WAIT_HINT: Duration = Duration::from_secs(10);

struct Binding {
    service: Service,
    runtime: Handle,
    outcome: oneshot::Sender<Result<()>>,
}

/// Handed from [`run_as_service`] to the dispatcher thread.
static BINDING: Mutex<Option<Binding>> = Mutex::new(None);

define_windows_service!(ffi_service_main, service_main);

/// Run `service` under the SCM if the SCM started this process.
///
/// Returns `None` when the process runs interactively; the caller then uses
/// the signal-driven run loop.
pub async fn run_as_service(service: &Service) -> Result<Option<Result<()>>> {
    let (outcome, settled) = oneshot::channel();
    *BINDING.lock().unwrap_or_else(PoisonError::into_inner) = Some(Binding {
        service: service.clone(),
        runtime: Handle::current(),
        outcome,
    });

    let name = service.name().to_string();
    let started =
        tokio::task::spawn_blocking(move || service_dispatcher::start(name, ffi_service_main))
            .await
            .context("Service dispatcher task panicked")?;

    match started {
        Ok(()) => {
            let result = settled
                .await
                .unwrap_or_else(|_| Err(anyhow!("service main exited without a result")));
            Ok(Some(result))
        }
        Err(windows_service::Error::Winapi(e))
            if e.raw_os_error() == Some(ERROR_FAILED_SERVICE_CONTROLLER_CONNECT) =>
        {
            BINDING.lock().unwrap_or_else(PoisonError::into_inner).take();
            debug!(target: "platform", "Not started by the service control manager");
            Ok(None)
        }
        Err(e) => {
            BINDING.lock().unwrap_or_else(PoisonError::into_inner).take();
            Err(e).context("Failed to start the service control dispatcher")
        }
    }
}

fn service_main(_arguments: Vec<OsString>) {
    let Some(binding) = BINDING.lock().unwrap_or_else(PoisonError::into_inner).take() else {
        return;
    };
    let result = binding.runtime.block_on(serve(&binding.service));
    let _ = binding.outcome.send(result);
}

async fn serve(service: &Service) -> Result<()> {
    let (request_tx, requests) = mpsc::channel(8);
    let handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
        let Some(request) = control_request(&control) else {
            return ServiceControlHandlerResult::NotImplemented;
        };
        if request_tx.try_send(request).is_err() {
            debug!(target: "platform", "Dropped {request:?}, the run loop is not listening");
        }
        ServiceControlHandlerResult::NoError
    };
    let status_handle = service_control_handler::register(service.name(), handler)
        .context("Failed to register the service control handler")?;

    let (status, mut reports) = mpsc::channel::<StatusReport>(8);
    let relay = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            if let Err(e) = status_handle.set_service_status(scm_status(report)) {
                warn!(target: "platform", "Failed to report {:?}: {e}", report.status);
            }
        }
    });

    info!(target: "platform", "Service '{}' bound to the service control manager", service.name());
    let result = service.run_managed(requests, status).await;
    // The relay ends once the Stopped report is delivered.
    if let Err(e) = relay.await {
        warn!(target: "platform", "Status relay failed: {e}");
    }
    result
}

fn control_request(control: &ServiceControl) -> Option<ControlRequest> {
    match control {
        ServiceControl::Interrogate => Some(ControlRequest::Interrogate),
        ServiceControl::Stop => Some(ControlRequest::Stop),
        ServiceControl::Shutdown => Some(ControlRequest::Shutdown),
        _ => None,
    }
}

fn scm_status(report: StatusReport) -> ServiceStatus {
    let (current_state, wait_hint) = match report.status {
        RunStatus::StartPending => (ServiceState::StartPending, PENDING_WAIT_HINT),
        RunStatus::Running => (ServiceState::Running, Duration::default()),
        RunStatus::StopPending => (ServiceState::StopPending, PENDING_WAIT_HINT),
        RunStatus::Stopped => (ServiceState::Stopped, Duration::default()),
    };
    let controls_accepted = if report.accepts_stop {
        ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
    } else {
        ServiceControlAccept::empty()
    };
    ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state,
        controls_accepted,
        exit_code: ServiceExitCode::Win32(report.exit_code),
        checkpoint: 0,
        wait_hint,
        process_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_accepts_stop_and_shutdown() {
        let status = scm_status(StatusReport {
            status: RunStatus::Running,
            accepts_stop: true,
            exit_code: 0,
        });
        assert_eq!(status.current_state, ServiceState::Running);
        assert!(status.controls_accepted.contains(ServiceControlAccept::STOP));
        assert!(status.controls_accepted.contains(ServiceControlAccept::SHUTDOWN));
    }

    #[test]
    fn test_stopped_carries_exit_code() {
        let status = scm_status(StatusReport {
            status: RunStatus::Stopped,
            accepts_stop: false,
            exit_code: 1,
        });
        assert_eq!(status.current_state, ServiceState::Stopped);
        assert_eq!(status.exit_code, ServiceExitCode::Win32(1));
        assert!(status.controls_accepted.is_empty());
    }

    #[test]
    fn test_pending_states_have_wait_hint() {
        let status = scm_status(StatusReport {
            status: RunStatus::StopPending,
            accepts_stop: false,
            exit_code: 0,
        });
        assert_eq!(status.current_state, ServiceState::StopPending);
        assert_eq!(status.wait_hint, PENDING_WAIT_HINT);
    }

    #[test]
    fn test_control_mapping() {
        assert_eq!(control_request(&ServiceControl::Stop), Some(ControlRequest::Stop));
        assert_eq!(control_request(&ServiceControl::Shutdown), Some(ControlRequest::Shutdown));
        assert_eq!(
            control_request(&ServiceControl::Interrogate),
            Some(ControlRequest::Interrogate)
        );
        assert_eq!(control_request(&ServiceControl::Pause), None);
    }

    #[tokio::test]
    async fn test_interactive_process_falls_back() {
        let service = Service::new("servicekit-interactive").exec(|| async { Ok(()) });
        assert!(run_as_service(&service).await.unwrap().is_none());
    }
}
