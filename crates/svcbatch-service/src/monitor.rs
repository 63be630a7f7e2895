//! Control monitor: runs custom controls and timed log rotation off the
//! service manager's thread.

use crate::context::ServiceContext;
use crate::stop::request_stop;
use std::sync::Arc;
use svcbatch_common::ControlSignal;
use svcbatch_log::schedule::{local_now, until};
use svcbatch_process::send_break;
use tracing::{debug, info, warn};

pub fn run_monitor(ctx: Arc<ServiceContext>) {
    debug!("Control monitor started");
    let schedule = ctx.config.options.rotate_time;
    let mut deadline = schedule.map(|time| time.next_after(local_now()));
    if let Some(at) = deadline {
        debug!(%at, "Next timed rotation");
    }

    // A post can set the event after the reset that drained its slot, so only
    // the release flag ends the loop
    while !ctx.monitor_released() {
        let woken = match deadline {
            Some(at) => ctx.monitor_wake.wait_timeout(until(at, local_now())),
            None => {
                ctx.monitor_wake.wait();
                true
            }
        };

        if !woken {
            let now = local_now();
            // The wall clock can move back while waiting
            if deadline.is_some_and(|at| now < at) {
                continue;
            }
            deadline = schedule.map(|time| time.next_after(now));
            if !rotate_on_schedule(&ctx) {
                break;
            }
            continue;
        }

        ctx.monitor_wake.reset();
        let Some(signal) = ctx.pending_control.take() else {
            continue;
        };
        match signal {
            ControlSignal::Break => forward_break(&ctx),
            ControlSignal::Rotate => {
                if let Err(e) = ctx.log.rotate() {
                    rotation_failed(&ctx, &e);
                    break;
                }
                info!(generation = ctx.log.generation(), "Log rotated");
            }
            other => debug!(signal = %other, "Ignoring control"),
        }
    }
    debug!("Control monitor finished");
}

/// Returns `false` when the monitor has to give up.
fn rotate_on_schedule(ctx: &Arc<ServiceContext>) -> bool {
    match ctx.log.rotate_if_written() {
        Ok(true) => {
            info!(generation = ctx.log.generation(), "Log rotated on schedule");
            true
        }
        Ok(false) => {
            debug!("No output since last rotation, skipping");
            true
        }
        Err(e) => {
            rotation_failed(ctx, &e);
            false
        }
    }
}

fn rotation_failed(ctx: &Arc<ServiceContext>, error: &svcbatch_common::Error) {
    ctx.record_failure("Log rotation failed", error);
    request_stop(ctx);
}

fn forward_break(ctx: &ServiceContext) {
    let Some(job) = ctx.running_job() else {
        return;
    };
    if !ctx.log.is_open() {
        return;
    }
    ctx.log.flush_and_write("CTRL_BREAK signaled");
    if let Err(e) = send_break(job.pid(), ctx.config.options.enable_break) {
        warn!(pid = job.pid(), "Failed to send break: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceOptions;
    use crate::context::testing::context_in;
    use std::thread;
    use std::time::{Duration, Instant};
    use svcbatch_log::manager::generation_path;
    use svcbatch_log::RotateTime;

    fn spawn_monitor(ctx: &Arc<ServiceContext>) -> thread::JoinHandle<()> {
        let ctx = ctx.clone();
        thread::spawn(move || run_monitor(ctx))
    }

    /// Once a day, `secs` seconds from now.
    fn daily_in(secs: i64) -> RotateTime {
        RotateTime::Daily(local_now().time() + chrono::TimeDelta::seconds(secs))
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_rotate_then_release() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), ServiceOptions::default());
        ctx.log.open().unwrap();

        let monitor = {
            let ctx = ctx.clone();
            thread::spawn(move || run_monitor(ctx))
        };
        ctx.post_control(ControlSignal::Rotate);
        assert!(wait_until(|| ctx.log.generation() == 1));
        assert!(generation_path(ctx.log.path(), 0).exists());

        ctx.release_monitor();
        monitor.join().unwrap();
        assert_eq!(ctx.failure_code(), None);
    }

    #[test]
    fn test_monitor_survives_control_storm() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), ServiceOptions::default());
        ctx.log.open().unwrap();
        let monitor = spawn_monitor(&ctx);

        let posters: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                thread::spawn(move || {
                    for _ in 0..20_000 {
                        ctx.post_control(ControlSignal::Break);
                    }
                })
            })
            .collect();
        while posters.iter().any(|p| !p.is_finished()) {
            assert!(!monitor.is_finished(), "monitor quit while controls were posted");
            thread::yield_now();
        }
        for poster in posters {
            poster.join().unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(!monitor.is_finished());

        ctx.release_monitor();
        monitor.join().unwrap();
        assert_eq!(ctx.failure_code(), None);
    }

    #[test]
    fn test_control_after_release_still_ends_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), ServiceOptions::default());
        ctx.log.open().unwrap();
        let monitor = spawn_monitor(&ctx);

        ctx.release_monitor();
        ctx.post_control(ControlSignal::Rotate);
        assert!(wait_until(|| monitor.is_finished()));
        monitor.join().unwrap();
    }

    #[test]
    fn test_timed_rotation_skips_idle_log() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServiceOptions {
            rotate_time: Some(daily_in(1)),
            ..ServiceOptions::default()
        };
        let ctx = context_in(dir.path(), options);
        ctx.log.open().unwrap();
        let monitor = spawn_monitor(&ctx);

        thread::sleep(Duration::from_millis(2500));
        assert!(!monitor.is_finished());
        assert_eq!(ctx.log.generation(), 0);
        assert!(!generation_path(ctx.log.path(), 0).exists());

        ctx.release_monitor();
        monitor.join().unwrap();
    }

    #[test]
    fn test_timed_rotation_with_output() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServiceOptions {
            rotate_time: Some(daily_in(1)),
            ..ServiceOptions::default()
        };
        let ctx = context_in(dir.path(), options);
        ctx.log.open().unwrap();
        ctx.log.lock().append_raw(b"child output\n").unwrap();
        let monitor = spawn_monitor(&ctx);

        assert!(wait_until(|| ctx.log.generation() == 1));
        let previous = std::fs::read_to_string(generation_path(ctx.log.path(), 0)).unwrap();
        assert!(previous.contains("child output"));

        ctx.release_monitor();
        monitor.join().unwrap();
        assert_eq!(ctx.failure_code(), None);
    }

    #[test]
    fn test_break_without_child_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServiceOptions {
            enable_break: true,
            ..ServiceOptions::default()
        };
        let ctx = context_in(dir.path(), options);
        ctx.log.open().unwrap();

        let monitor = {
            let ctx = ctx.clone();
            thread::spawn(move || run_monitor(ctx))
        };
        ctx.post_control(ControlSignal::Break);
        assert!(wait_until(|| !ctx.monitor_wake.is_set()));
        ctx.release_monitor();
        monitor.join().unwrap();

        ctx.log.close().unwrap();
        let log = std::fs::read_to_string(ctx.log.path()).unwrap();
        assert!(!log.contains("CTRL_BREAK"));
    }

    #[test]
    fn test_rotation_failure_ends_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let options = ServiceOptions {
            max_logs: 0,
            ..ServiceOptions::default()
        };
        let ctx = context_in(dir.path(), options);
        ctx.log.open().unwrap();
        // A non-empty directory where the previous log has to go
        let blocker = generation_path(ctx.log.path(), 0);
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let monitor = {
            let ctx = ctx.clone();
            thread::spawn(move || run_monitor(ctx))
        };
        ctx.post_control(ControlSignal::Rotate);
        monitor.join().unwrap();

        assert!(ctx.failure_code().is_some());
        // Not running, so no stop sequence was started
        assert!(!ctx.stop_requested());
    }
}
