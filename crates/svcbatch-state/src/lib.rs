//! # svcbatch state
//!
//! Service status as seen by the platform service manager.
//!
//! The status only ever moves forward:
//! `StartPending -> Running -> StopPending -> Stopped`. Every change goes
//! through [`StatusMachine::report`] under one lock and is pushed to a
//! [`StatusReporter`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use svcbatch_common::codes::{ERROR_PROCESS_ABORTED, ERROR_SERVICE_SPECIFIC_ERROR};
use svcbatch_common::Result;
use tracing::{debug, info, warn};

pub const SERVICE_ACCEPT_STOP: u32 = 0x0000_0001;
pub const SERVICE_ACCEPT_SHUTDOWN: u32 = 0x0000_0004;
pub const SERVICE_ACCEPT_PRESHUTDOWN: u32 = 0x0000_0100;

const MAX_HISTORY: usize = 100;

/// Service lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

impl ServiceState {
    /// Win32 `SERVICE_*` state value.
    pub fn code(self) -> u32 {
        match self {
            ServiceState::Stopped => 1,
            ServiceState::StartPending => 2,
            ServiceState::StopPending => 3,
            ServiceState::Running => 4,
        }
    }

    fn rank(self) -> u8 {
        match self {
            ServiceState::StartPending => 0,
            ServiceState::Running => 1,
            ServiceState::StopPending => 2,
            ServiceState::Stopped => 3,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::StartPending => write!(f, "START_PENDING"),
            ServiceState::Running => write!(f, "RUNNING"),
            ServiceState::StopPending => write!(f, "STOP_PENDING"),
            ServiceState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Snapshot handed to the service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub controls_accepted: u32,
    pub win32_exit_code: u32,
    pub service_exit_code: u32,
    pub checkpoint: u32,
    /// Milliseconds.
    pub wait_hint: u32,
}

impl ServiceStatus {
    fn initial() -> Self {
        Self {
            state: ServiceState::StartPending,
            controls_accepted: 0,
            win32_exit_code: 0,
            service_exit_code: 0,
            checkpoint: 0,
            wait_hint: 0,
        }
    }

    /// The exit code a process-level caller should use.
    pub fn exit_code(&self) -> u32 {
        if self.win32_exit_code == ERROR_SERVICE_SPECIFIC_ERROR {
            self.service_exit_code
        } else {
            self.win32_exit_code
        }
    }
}

/// Destination of status updates.
pub trait StatusReporter: Send + Sync {
    /// Publish `status` to the service manager.
    fn report(&self, status: &ServiceStatus) -> Result<()>;

    /// Terminate the whole process with `code` instead of reporting `Stopped`.
    fn exit_process(&self, code: u32) {
        std::process::exit(code as i32);
    }
}

/// Reporter that only traces status changes (foreground runs).
#[derive(Debug, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, status: &ServiceStatus) -> Result<()> {
        info!(
            state = %status.state,
            checkpoint = status.checkpoint,
            wait_hint = status.wait_hint,
            exit_code = status.exit_code(),
            "Service status"
        );
        Ok(())
    }
}

/// One recorded state change.
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub from_state: ServiceState,
    pub to_state: ServiceState,
    pub timestamp: DateTime<Utc>,
    pub checkpoint: u32,
}

/// Behavior when the service stops with an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopPolicy {
    /// Accept pre-shutdown notifications in addition to stop and shutdown.
    pub accept_preshutdown: bool,
    /// Exit the process instead of reporting a failed `Stopped`, so the
    /// service manager's recovery actions kick in.
    pub exit_on_error: bool,
}

struct Inner {
    status: ServiceStatus,
    checkpoint: u32,
    history: Vec<StateTransition>,
}

/// The one place service status is mutated.
pub struct StatusMachine {
    reporter: Arc<dyn StatusReporter>,
    policy: StopPolicy,
    inner: Mutex<Inner>,
}

impl StatusMachine {
    pub fn new(reporter: Arc<dyn StatusReporter>, policy: StopPolicy) -> Self {
        Self {
            reporter,
            policy,
            inner: Mutex::new(Inner {
                status: ServiceStatus::initial(),
                checkpoint: 0,
                history: Vec::new(),
            }),
        }
    }

    pub fn current_state(&self) -> ServiceState {
        self.inner.lock().status.state
    }

    pub fn status(&self) -> ServiceStatus {
        self.inner.lock().status.clone()
    }

    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().history.clone()
    }

    pub fn start_pending(&self, hint: Duration) -> Result<()> {
        self.report(Some(ServiceState::StartPending), Some(millis(hint)))
    }

    pub fn running(&self) -> Result<()> {
        self.report(Some(ServiceState::Running), None)
    }

    pub fn stop_pending(&self, hint: Duration) -> Result<()> {
        self.report(Some(ServiceState::StopPending), Some(millis(hint)))
    }

    /// Report `Stopped` with `exit_code`, or the generic abort code if none.
    pub fn stopped(&self, exit_code: Option<u32>) -> Result<()> {
        self.report(Some(ServiceState::Stopped), exit_code)
    }

    /// Re-push the unchanged status (interrogate).
    pub fn reannounce(&self) -> Result<()> {
        self.report(None, None)
    }

    /// Apply a status change and publish it.
    ///
    /// `state == None` re-publishes the current status. `param` is the wait
    /// hint in milliseconds for pending states and the exit code for
    /// `Stopped`. Requests that would move the state backwards, and any
    /// request once `Stopped` was reached, are ignored.
    pub fn report(&self, state: Option<ServiceState>, param: Option<u32>) -> Result<()> {
        let mut inner = self.inner.lock();
        let current = inner.status.state;

        if current == ServiceState::Stopped {
            debug!(requested = ?state, "Service already stopped, ignoring status request");
            return Ok(());
        }

        let Some(target) = state else {
            let status = inner.status.clone();
            return self.reporter.report(&status);
        };

        if target.rank() < current.rank() {
            debug!(%current, %target, "Ignoring backward status transition");
            return Ok(());
        }

        let mut status = inner.status.clone();
        status.state = target;
        status.controls_accepted = 0;
        status.checkpoint = 0;
        status.wait_hint = 0;

        match target {
            ServiceState::Running => {
                status.controls_accepted = SERVICE_ACCEPT_STOP | SERVICE_ACCEPT_SHUTDOWN;
                if self.policy.accept_preshutdown {
                    status.controls_accepted |= SERVICE_ACCEPT_PRESHUTDOWN;
                }
                inner.checkpoint = 0;
            }
            ServiceState::Stopped => {
                let code = param.unwrap_or(ERROR_PROCESS_ABORTED);
                if code == 0 {
                    status.win32_exit_code = 0;
                    status.service_exit_code = 0;
                } else {
                    status.win32_exit_code = ERROR_SERVICE_SPECIFIC_ERROR;
                    status.service_exit_code = code;
                }
                if code != 0 && self.policy.exit_on_error && current != ServiceState::StopPending {
                    warn!(code, "Service failed without a stop request, exiting process");
                    record(&mut inner, current, &status);
                    inner.status = status;
                    drop(inner);
                    self.reporter.exit_process(code);
                    return Ok(());
                }
            }
            ServiceState::StartPending | ServiceState::StopPending => {
                inner.checkpoint += 1;
                status.checkpoint = inner.checkpoint;
                status.wait_hint = param.unwrap_or(0);
            }
        }

        if target != current {
            debug!(from = %current, to = %target, "Service status transition");
        }
        record(&mut inner, current, &status);
        inner.status = status.clone();
        self.reporter.report(&status)
    }
}

fn record(inner: &mut Inner, from: ServiceState, status: &ServiceStatus) {
    inner.history.push(StateTransition {
        from_state: from,
        to_state: status.state,
        timestamp: Utc::now(),
        checkpoint: status.checkpoint,
    });
    if inner.history.len() > MAX_HISTORY {
        inner.history.remove(0);
    }
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}
