//! Stop sequence.
//!
//! Run the stop script if there is one, interrupt the child, answer the batch
//! prompt, then kill the whole tree if the child is still around.

use crate::context::ServiceContext;
use crate::job::ChildJob;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use svcbatch_common::codes::ERROR_ARENA_TRASHED;
use svcbatch_common::{Error, Event};
use svcbatch_log::drain_output;
use svcbatch_process::{interrupt, kill_group, kill_tree, ChildSpec, InterruptGuard, SpawnedChild};
use svcbatch_state::ServiceState;
use tracing::{debug, error, info, warn};

/// Start the stop sequence on its own thread.
///
/// Returns `false` when the service is not running or a stop is already
/// underway. Never blocks on the child.
pub fn request_stop(ctx: &Arc<ServiceContext>) -> bool {
    if ctx.status.current_state() != ServiceState::Running {
        debug!("Stop ignored, service is not running");
        return false;
    }
    if !ctx.stop_started.try_begin() {
        debug!("Stop already in progress");
        return false;
    }
    ctx.stop_signaled.reset();

    let worker = ctx.clone();
    let spawned = thread::Builder::new()
        .name("stop".to_string())
        .spawn(move || {
            stop_sequence(&worker);
            worker.stop_signaled.set();
        });
    if let Err(e) = spawned {
        ctx.record_failure("Failed to start stop sequence", &Error::thread("stop", e));
        ctx.stop_signaled.set();
        return false;
    }
    true
}

fn stop_sequence(ctx: &Arc<ServiceContext>) {
    let options = &ctx.config.options;
    let timeouts = &options.timeouts;

    if let Err(e) = ctx.status.stop_pending(timeouts.stop_hint) {
        warn!("Failed to report STOP_PENDING: {}", e);
    }
    ctx.log.flush_and_write("Service STOP signaled");

    let Some(job) = ctx.running_job() else {
        info!("No child running, nothing to stop");
        return;
    };
    let pid = job.pid();

    if let Some(spec) = ctx.stop_spec() {
        run_stop_script(ctx, &spec);
        if let Err(e) = ctx.status.stop_pending(timeouts.stop_hint) {
            warn!("Failed to report STOP_PENDING: {}", e);
        }
        if ctx.process_ended.wait_timeout(timeouts.stop_hint) {
            info!(pid, "Child stopped after stop script");
            return;
        }
        debug!(pid, "Child still running after stop script");
    }

    let _guard: Option<InterruptGuard> = match interrupt(pid) {
        Ok(guard) => Some(guard),
        Err(e) => {
            warn!(pid, "Failed to interrupt child: {}", e);
            None
        }
    };

    if ctx.process_ended.wait_timeout(timeouts.pending_interval) {
        info!(pid, "Child stopped after interrupt");
        return;
    }

    // cmd.exe asks "Terminate batch job (Y/N)?"
    debug!(pid, "Answering batch prompt");
    if let Err(e) = job.write_stdin(options.stdin_ack.as_bytes()) {
        warn!(pid, "Failed to answer batch prompt: {}", e);
    }

    if let Err(e) = ctx.status.stop_pending(timeouts.stop_timeout) {
        warn!("Failed to report STOP_PENDING: {}", e);
    }
    if ctx.process_ended.wait_timeout(timeouts.stop_hint) {
        info!(pid, "Child stopped");
        return;
    }

    ctx.log
        .flush_and_write("Child did not stop in time, terminating process tree");
    warn!(pid, "Child did not stop in time, terminating process tree");
    match kill_tree(pid, Some(pid), ERROR_ARENA_TRASHED, options.kill_depth) {
        Ok(count) => debug!(count, "Descendants terminated"),
        Err(e) => warn!(pid, "Failed to terminate descendants: {}", e),
    }
    if let Err(e) = job.terminate(ERROR_ARENA_TRASHED) {
        warn!(pid, "Failed to terminate child: {}", e);
    }
    if let Err(e) = kill_group(pid) {
        warn!(pid, "Failed to kill child process group: {}", e);
    }
}

/// Run the stop script to completion with its output going to the log.
///
/// A script still running after `stop_hint` is killed.
fn run_stop_script(ctx: &Arc<ServiceContext>, spec: &ChildSpec) {
    let timeouts = &ctx.config.options.timeouts;
    ctx.log
        .flush_and_write(&format!("Running stop script {}", spec.script.display()));

    let SpawnedChild {
        child,
        output,
        stdin,
    } = match spec.spawn() {
        Ok(spawned) => spawned,
        Err(e) => {
            ctx.log.flush_and_write(&format!("Failed to run stop script: {}", e));
            warn!("Failed to run stop script: {}", e);
            return;
        }
    };
    let script = ChildJob::new(child, stdin);
    script.close_stdin();
    let pid = script.pid();

    let drained = Arc::new(Event::new(false));
    let reader = {
        let ctx = ctx.clone();
        let drained = drained.clone();
        thread::Builder::new()
            .name("stop-script-output".to_string())
            .spawn(move || {
                if let Err(e) = drain_output(output, &ctx.log, None, || {}) {
                    error!("Stop script output reader stopped: {}", e);
                }
                drained.set();
            })
    };

    match script.wait_timeout(timeouts.stop_hint) {
        Ok(Some(code)) => {
            ctx.log
                .flush_and_write(&format!("Stop script exited with code {}", code));
            info!(pid, code, "Stop script finished");
        }
        Ok(None) => {
            ctx.log
                .flush_and_write("Stop script did not finish in time, terminating it");
            warn!(pid, "Stop script did not finish in time");
            end_stop_script(&script);
        }
        Err(e) => {
            warn!(pid, "Failed to wait for stop script: {}", e);
            end_stop_script(&script);
        }
    }

    match reader {
        Ok(reader) => {
            if !drained.wait_timeout(timeouts.pending_interval) {
                // Leftovers of the script still hold its output open
                let _ = kill_group(pid);
            }
            if drained.wait_timeout(timeouts.pending_interval) {
                let _ = reader.join();
            } else {
                warn!(pid, "Stop script output still open, leaving reader behind");
            }
        }
        Err(e) => warn!("Failed to start stop script output reader: {}", e),
    }
}

fn end_stop_script(script: &ChildJob) {
    let pid = script.pid();
    if let Err(e) = script.terminate(ERROR_ARENA_TRASHED) {
        warn!(pid, "Failed to terminate stop script: {}", e);
    }
    if let Err(e) = kill_group(pid) {
        debug!(pid, "Failed to kill stop script process group: {}", e);
    }
    if let Err(e) = script.wait_timeout(Duration::from_secs(1)) {
        warn!(pid, "Failed to reap stop script: {}", e);
    }
}
