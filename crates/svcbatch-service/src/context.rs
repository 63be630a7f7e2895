//! State shared by the threads of one service run.

use crate::config::{FailMode, ServiceConfig};
use crate::eventlog;
use crate::job::ChildJob;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use svcbatch_common::{ControlSignal, Error, Event, OnceFlag, SignalSlot};
use svcbatch_log::LogManager;
use svcbatch_process::ChildSpec;
use svcbatch_state::{StatusMachine, StatusReporter, StopPolicy};
use tracing::debug;
use uuid::Uuid;

pub struct ServiceContext {
    pub config: ServiceConfig,
    pub uuid: Uuid,
    pub status: StatusMachine,
    pub log: LogManager,

    /// Set once the child has exited and its output is drained.
    pub process_ended: Event,
    /// Clear while a stop sequence runs.
    pub stop_signaled: Event,
    /// Set after `Stopped` has been reported.
    pub service_ended: Event,
    /// Wakes the control monitor.
    pub monitor_wake: Event,
    /// Custom control waiting for the monitor; only the latest one counts.
    pub pending_control: SignalSlot,
    pub stop_started: OnceFlag,

    monitor_released: AtomicBool,
    stop_spec: Mutex<Option<ChildSpec>>,
    job: Mutex<Option<Arc<ChildJob>>>,
    child_exit: Mutex<Option<u32>>,
    failure: Mutex<Option<u32>>,
}

impl ServiceContext {
    pub fn new(config: ServiceConfig, reporter: Arc<dyn StatusReporter>) -> Self {
        let policy = StopPolicy {
            accept_preshutdown: config.options.accept_preshutdown,
            exit_on_error: config.options.fail_mode == FailMode::Exit,
        };
        let log = LogManager::new(config.log_config());
        Self {
            uuid: Uuid::new_v4(),
            status: StatusMachine::new(reporter, policy),
            log,
            process_ended: Event::new(false),
            stop_signaled: Event::new(true),
            service_ended: Event::new(false),
            monitor_wake: Event::new(false),
            pending_control: SignalSlot::new(),
            stop_started: OnceFlag::new(),
            monitor_released: AtomicBool::new(false),
            stop_spec: Mutex::new(None),
            job: Mutex::new(None),
            child_exit: Mutex::new(None),
            failure: Mutex::new(None),
            config,
        }
    }

    pub fn set_job(&self, job: Option<Arc<ChildJob>>) {
        *self.job.lock() = job;
    }

    pub fn job(&self) -> Option<Arc<ChildJob>> {
        self.job.lock().clone()
    }

    /// The child, if it is still running.
    pub fn running_job(&self) -> Option<Arc<ChildJob>> {
        self.job().filter(|job| job.is_running())
    }

    /// Command run by the stop sequence before the interrupt.
    pub fn set_stop_spec(&self, spec: ChildSpec) {
        *self.stop_spec.lock() = Some(spec);
    }

    pub fn stop_spec(&self) -> Option<ChildSpec> {
        self.stop_spec.lock().clone()
    }

    pub fn set_child_exit_code(&self, code: u32) {
        *self.child_exit.lock() = Some(code);
    }

    /// Exit code of the child, once it has exited.
    pub fn child_exit_code(&self) -> Option<u32> {
        *self.child_exit.lock()
    }

    /// Queue a custom control for the monitor.
    pub fn post_control(&self, signal: ControlSignal) {
        if let Some(replaced) = self.pending_control.post(signal) {
            debug!(%replaced, %signal, "Pending control replaced");
        }
        self.monitor_wake.set();
    }

    /// Tell the monitor to exit.
    pub fn release_monitor(&self) {
        self.monitor_released.store(true, Ordering::Release);
        self.pending_control.clear();
        self.monitor_wake.set();
    }

    /// Whether the monitor has been told to exit.
    pub fn monitor_released(&self) -> bool {
        self.monitor_released.load(Ordering::Acquire)
    }

    /// Log a failure everywhere it can be seen and keep the first one as the
    /// service exit code.
    pub fn record_failure(&self, what: &str, error: &Error) {
        let message = format!("{}: {}", what, error);
        self.log.flush_and_write(&message);
        eventlog::report_error(&self.config.service_name, &message);

        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(nonzero(error.os_code()));
        }
    }

    pub fn failure_code(&self) -> Option<u32> {
        *self.failure.lock()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_started.is_started()
    }
}

fn nonzero(code: u32) -> u32 {
    if code == 0 {
        svcbatch_common::codes::ERROR_PROCESS_ABORTED
    } else {
        code
    }
}
