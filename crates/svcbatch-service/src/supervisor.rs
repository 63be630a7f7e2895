//! Child supervision.
//!
//! Spawns the child, copies its output into the log on a dedicated reader
//! thread, waits for it to exit and cleans up whatever it left behind.

use crate::context::ServiceContext;
use crate::job::ChildJob;
use std::sync::Arc;
use std::thread;
use svcbatch_common::codes::ERROR_ARENA_TRASHED;
use svcbatch_common::{ControlSignal, Error, Event};
use svcbatch_log::drain_output;
use svcbatch_process::{kill_descendants, kill_group, ChildSpec, SpawnedChild};
use tracing::{debug, error, info, warn};

pub fn run_supervisor(ctx: Arc<ServiceContext>, spec: ChildSpec) {
    if let Err(e) = supervise(&ctx, &spec) {
        ctx.record_failure("Child supervision failed", &e);
    }
    ctx.set_job(None);
    ctx.process_ended.set();
    ctx.release_monitor();
    debug!("Supervisor finished");
}

fn supervise(ctx: &Arc<ServiceContext>, spec: &ChildSpec) -> svcbatch_common::Result<()> {
    let SpawnedChild {
        child,
        output,
        stdin,
    } = spec.spawn()?;

    let job = Arc::new(ChildJob::new(child, stdin));
    let pid = job.pid();
    ctx.set_job(Some(job.clone()));
    info!(pid, "Child process started");

    let reader_done = Arc::new(Event::new(false));
    let reader = {
        let ctx = ctx.clone();
        let done = reader_done.clone();
        thread::Builder::new()
            .name("output-reader".to_string())
            .spawn(move || {
                let rotate_size = ctx.config.options.rotate_size;
                let on_full = || ctx.post_control(ControlSignal::Rotate);
                match drain_output(output, &ctx.log, rotate_size, on_full) {
                    Ok(bytes) => debug!(bytes, "Child output drained"),
                    Err(e) => error!("Output reader stopped: {}", e),
                }
                done.set();
            })
    };
    let reader = match reader {
        Ok(handle) => handle,
        Err(e) => {
            let _ = job.terminate(ERROR_ARENA_TRASHED);
            let _ = job.wait();
            return Err(Error::thread("output-reader", e));
        }
    };

    if let Err(e) = ctx.status.running() {
        ctx.record_failure("Failed to report RUNNING", &e);
    }
    ctx.log.flush_and_write("Service RUNNING");

    let exit_code = match job.wait() {
        Ok(code) => code,
        Err(e) => {
            let _ = job.terminate(ERROR_ARENA_TRASHED);
            return Err(e);
        }
    };
    info!(pid, exit_code, "Child process exited");
    ctx.set_child_exit_code(exit_code);
    job.close_stdin();

    let timeouts = &ctx.config.options.timeouts;
    if !reader_done.wait_timeout(timeouts.pending_interval) {
        // Descendants still hold the output pipe open
        warn!(pid, "Output still open after child exit, killing leftovers");
        // The child is reaped, so its pid is no longer ours to kill
        match kill_descendants(pid, ERROR_ARENA_TRASHED, ctx.config.options.kill_depth) {
            Ok(count) => debug!(count, "Leftover processes killed"),
            Err(e) => warn!("Failed to kill leftover processes: {}", e),
        }
        if let Err(e) = kill_group(pid) {
            warn!("Failed to kill child process group: {}", e);
        }
    }

    if reader_done.wait_timeout(timeouts.stop_timeout) {
        if reader.join().is_err() {
            error!("Output reader panicked");
        }
    } else {
        error!("Output reader did not finish, leaving it behind");
    }
    Ok(())
}
