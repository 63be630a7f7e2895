// E2E test framework for SvcBatch: drives a ServiceController in-process

pub mod assertions;

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use svcbatch_common::ControlSignal;
use svcbatch_service::{
    ControlHandle, ServiceConfig, ServiceContext, ServiceController, ServiceOptions,
};
use svcbatch_state::{ServiceState, ServiceStatus, StatusReporter};
use tempfile::TempDir;

/// Create a scratch directory for one test
pub fn create_test_dir(test_name: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("svcbatch-e2e-{}-", test_name))
        .tempdir()
        .expect("Failed to create test directory")
}

/// Write a shell script into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).expect("Failed to write script");
    path
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Options with timeouts short enough for tests
pub fn fast_options() -> ServiceOptions {
    let mut options = ServiceOptions::default();
    options.timeouts.pending_interval = Duration::from_millis(200);
    options.timeouts.start_hint = Duration::from_secs(1);
    options.timeouts.stop_hint = Duration::from_secs(2);
    options.timeouts.stop_timeout = Duration::from_secs(5);
    options
}

/// Whether `pid` is a live process (zombies count as dead)
#[cfg(target_os = "linux")]
pub fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => {
            // State follows the parenthesized command name
            let state = stat
                .rfind(')')
                .and_then(|i| stat[i + 1..].split_whitespace().next());
            !matches!(state, Some("Z") | Some("X") | None)
        }
        Err(_) => false,
    }
}

/// Status reporter that keeps everything it is told
#[derive(Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<ServiceStatus>>,
    exits: Mutex<Vec<u32>>,
}

impl RecordingReporter {
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.statuses.lock().clone()
    }

    /// Reported states with consecutive repeats collapsed
    pub fn states(&self) -> Vec<ServiceState> {
        let mut states: Vec<ServiceState> = Vec::new();
        for status in self.statuses.lock().iter() {
            if states.last() != Some(&status.state) {
                states.push(status.state);
            }
        }
        states
    }

    pub fn last(&self) -> Option<ServiceStatus> {
        self.statuses.lock().last().cloned()
    }

    pub fn exits(&self) -> Vec<u32> {
        self.exits.lock().clone()
    }
}

impl StatusReporter for RecordingReporter {
    fn report(&self, status: &ServiceStatus) -> svcbatch_common::Result<()> {
        self.statuses.lock().push(status.clone());
        Ok(())
    }

    fn exit_process(&self, code: u32) {
        self.exits.lock().push(code);
    }
}

/// A service run on a background thread
pub struct ServiceHarness {
    pub dir: TempDir,
    pub reporter: Arc<RecordingReporter>,
    pub handle: ControlHandle,
    pub context: Arc<ServiceContext>,
    runner: Option<JoinHandle<u32>>,
}

impl ServiceHarness {
    /// Start a service named `name` running `body` as its script
    pub fn start(name: &str, body: &str, options: ServiceOptions) -> Self {
        let dir = create_test_dir(name);
        Self::start_in(dir, name, body, options)
    }

    pub fn start_in(dir: TempDir, name: &str, body: &str, options: ServiceOptions) -> Self {
        let script = write_script(dir.path(), "run.sh", body);
        let config = ServiceConfig::resolve(name, &script, Some(dir.path()), options)
            .expect("Failed to resolve service config");

        let reporter = Arc::new(RecordingReporter::default());
        let controller = ServiceController::new(config, reporter.clone());
        let handle = controller.control_handle();
        let context = controller.context().clone();
        let runner = thread::spawn(move || controller.run());

        Self {
            dir,
            reporter,
            handle,
            context,
            runner: Some(runner),
        }
    }

    pub fn log_path(&self) -> PathBuf {
        self.context.config.log_path.clone()
    }

    pub fn read_log(&self) -> String {
        read_lossy(&self.log_path())
    }

    pub fn wait_for_log(&self, needle: &str, timeout: Duration) -> bool {
        wait_for(timeout, || self.read_log().contains(needle))
    }

    pub fn wait_for_state(&self, state: ServiceState, timeout: Duration) -> bool {
        wait_for(timeout, || self.context.status.current_state() == state)
    }

    pub fn control(&self, signal: ControlSignal) -> Result<(), u32> {
        self.handle.control(signal)
    }

    /// Wait for the run to finish and return its exit code
    pub fn wait_stopped(&mut self, timeout: Duration) -> u32 {
        assert!(
            wait_for(timeout, || self.handle.has_ended()),
            "Service did not stop within {:?}. Log:\n{}",
            timeout,
            self.read_log()
        );
        self.runner
            .take()
            .expect("Service already joined")
            .join()
            .expect("Service thread panicked")
    }
}

pub fn read_lossy(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
