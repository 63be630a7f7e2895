//! Service lifecycle.
//!
//! [`ServiceController::run`] drives one service run from `StartPending` to
//! `Stopped`; [`ControlHandle`] is what the service manager's control
//! callback talks to.

use crate::config::{FailMode, ServiceConfig};
use crate::context::ServiceContext;
use crate::environment::{EnvironmentBuilder, ServiceIdentity};
use crate::monitor::run_monitor;
use crate::stop::request_stop;
use crate::supervisor::run_supervisor;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use svcbatch_common::codes::{is_stop_exit_code, ERROR_INVALID_SERVICE_CONTROL};
use svcbatch_common::{ControlSignal, Error, Result};
use svcbatch_process::ChildSpec;
use svcbatch_state::StatusReporter;
use tracing::{debug, error, info, warn};

pub struct ServiceController {
    ctx: Arc<ServiceContext>,
}

/// Cloneable entry point for service controls.
#[derive(Clone)]
pub struct ControlHandle {
    ctx: Arc<ServiceContext>,
}

impl ServiceController {
    pub fn new(config: ServiceConfig, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            ctx: Arc::new(ServiceContext::new(config, reporter)),
        }
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            ctx: self.ctx.clone(),
        }
    }

    pub fn context(&self) -> &Arc<ServiceContext> {
        &self.ctx
    }

    /// Run the service to completion and return the exit code reported with
    /// `Stopped`.
    pub fn run(self) -> u32 {
        let ctx = self.ctx;
        info!(
            service = %ctx.config.service_name,
            uuid = %ctx.uuid,
            batch = %ctx.config.batch_file.display(),
            "Starting service"
        );
        if let Err(e) = ctx.status.start_pending(ctx.config.options.timeouts.start_hint) {
            warn!("Failed to report START_PENDING: {}", e);
        }

        let threads = match start(&ctx) {
            Ok(threads) => Some(threads),
            Err(e) => {
                ctx.record_failure("Service failed to start", &e);
                None
            }
        };

        if let Some((monitor, supervisor)) = threads {
            join("supervisor", supervisor);
            join("control-monitor", monitor);
        }

        let timeout = ctx.config.options.timeouts.stop_timeout;
        if !ctx.stop_signaled.wait_timeout(timeout) {
            warn!("Stop sequence still running after {:?}", timeout);
        }

        let code = final_exit_code(&ctx);
        let shown = code.unwrap_or(svcbatch_common::codes::ERROR_PROCESS_ABORTED);
        ctx.log
            .flush_and_write(&format!("Service stopped with exit code {}", shown));
        if let Err(e) = ctx.log.close() {
            error!("Failed to close log: {}", e);
        }

        ctx.service_ended.set();
        if let Err(e) = ctx.status.stopped(code) {
            error!("Failed to report STOPPED: {}", e);
        }
        info!(exit_code = shown, "Service stopped");
        shown
    }
}

impl ControlHandle {
    /// Handle a control from the service manager.
    ///
    /// Returns `Err` with a Win32 code for controls that are not accepted.
    /// Never blocks on the child.
    pub fn control(&self, signal: ControlSignal) -> std::result::Result<(), u32> {
        let ctx = &self.ctx;
        debug!(%signal, "Service control");
        match signal {
            ControlSignal::Stop | ControlSignal::Shutdown | ControlSignal::PreShutdown => {
                request_stop(ctx);
                Ok(())
            }
            ControlSignal::Interrogate => {
                if let Err(e) = ctx.status.reannounce() {
                    warn!("Failed to re-announce status: {}", e);
                }
                Ok(())
            }
            ControlSignal::Break => {
                if !ctx.config.options.enable_break {
                    return Err(ERROR_INVALID_SERVICE_CONTROL);
                }
                ctx.post_control(signal);
                Ok(())
            }
            ControlSignal::Rotate => {
                ctx.post_control(signal);
                Ok(())
            }
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ctx.service_ended.is_set()
    }
}

type Threads = (JoinHandle<()>, JoinHandle<()>);

fn start(ctx: &Arc<ServiceContext>) -> Result<Threads> {
    let config = &ctx.config;

    #[cfg(windows)]
    svcbatch_process::ensure_console();

    let identity = ServiceIdentity {
        name: config.service_name.clone(),
        uuid: ctx.uuid.to_string(),
        exe_path: config.exe_path.clone(),
        base_dir: config.base_dir.clone(),
        work_dir: config.work_dir.clone(),
    };
    let env = EnvironmentBuilder::new(config.options.allow_list, config.options.clean_path)
        .build(&EnvironmentBuilder::host_variables(), &identity);
    debug!(count = env.len(), "Child environment prepared");

    let spec = ChildSpec {
        interpreter: config.interpreter.clone(),
        script: config.batch_file.clone(),
        work_dir: config.work_dir.clone(),
        env: env.into_vec(),
        new_group: config.options.enable_break,
    };

    if let Some(script) = &config.stop_script {
        ctx.set_stop_spec(ChildSpec {
            script: script.clone(),
            ..spec.clone()
        });
    }

    ctx.log.set_banner(banner(ctx, &spec));
    ctx.log.open()?;
    {
        let mut log = ctx.log.lock();
        log.write_banner()?;
        log.flush()?;
    }

    let monitor = {
        let ctx = ctx.clone();
        thread::Builder::new()
            .name("control-monitor".to_string())
            .spawn(move || run_monitor(ctx))
            .map_err(|e| Error::thread("control-monitor", e))?
    };

    let supervisor = {
        let ctx = ctx.clone();
        thread::Builder::new()
            .name("supervisor".to_string())
            .spawn(move || run_supervisor(ctx, spec))
    };
    match supervisor {
        Ok(supervisor) => Ok((monitor, supervisor)),
        Err(e) => {
            ctx.release_monitor();
            join("control-monitor", monitor);
            Err(Error::thread("supervisor", e))
        }
    }
}

fn banner(ctx: &ServiceContext, spec: &ChildSpec) -> Vec<(String, String)> {
    let config = &ctx.config;
    let mut entries = vec![
        ("Service name".to_string(), config.service_name.clone()),
        ("Service uuid".to_string(), ctx.uuid.to_string()),
        ("Batch file".to_string(), config.batch_file.display().to_string()),
        ("Base directory".to_string(), config.base_dir.display().to_string()),
        ("Working directory".to_string(), config.work_dir.display().to_string()),
        ("Log file".to_string(), config.log_path.display().to_string()),
        ("Command line".to_string(), spec.command_line()),
    ];
    if let Some(script) = &config.stop_script {
        entries.push(("Stop script".to_string(), script.display().to_string()));
    }
    if let Some(time) = config.options.rotate_time {
        entries.push(("Rotate time".to_string(), time.to_string()));
    }
    entries
}

fn join(name: &str, handle: JoinHandle<()>) {
    if handle.join().is_err() {
        error!(thread = name, "Thread panicked");
    }
}

/// Exit code to report with `Stopped`; `None` means the generic abort code.
fn final_exit_code(ctx: &ServiceContext) -> Option<u32> {
    if let Some(code) = ctx.failure_code() {
        return Some(code);
    }
    if ctx.stop_requested() {
        return Some(0);
    }
    let code = ctx.child_exit_code()?;
    child_exit_code(code, ctx.config.options.fail_mode)
}

/// Service exit code for a child that ended without a stop request.
pub fn child_exit_code(code: u32, fail_mode: FailMode) -> Option<u32> {
    if code == 0 || is_stop_exit_code(code) {
        return Some(0);
    }
    match fail_mode {
        FailMode::None => Some(0),
        FailMode::Error | FailMode::Exit => Some(code),
    }
}
