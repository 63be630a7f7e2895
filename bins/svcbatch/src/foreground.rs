//! Foreground runs on Unix, where signals stand in for service controls.

use crate::cli::Args;
use anyhow::{Context, Result};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;
use std::sync::Arc;
use std::thread;
use svcbatch_common::ControlSignal;
use svcbatch_service::ServiceController;
use svcbatch_state::TracingReporter;
use tracing::{debug, info, warn};

pub fn run(args: Args) -> Result<u32> {
    let name = args.default_name()?;
    let config = args.service_config(&name)?;

    let controller = ServiceController::new(config, Arc::new(TracingReporter));
    let handle = controller.control_handle();

    let mut signals = Signals::new([SIGTERM, SIGINT, SIGHUP, SIGUSR1, SIGUSR2])
        .context("Failed to install signal handlers")?;
    let signals_handle = signals.handle();
    let listener = thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let Some(control) = control_for(sig) else {
                    continue;
                };
                info!(signal = sig, %control, "Signal received");
                if let Err(code) = handle.control(control) {
                    warn!(%control, code, "Control rejected");
                }
            }
            debug!("Signal listener finished");
        })
        .context("Failed to start signal listener")?;

    let code = controller.run();

    signals_handle.close();
    let _ = listener.join();
    Ok(code)
}

fn control_for(signal: i32) -> Option<ControlSignal> {
    match signal {
        SIGTERM | SIGINT => Some(ControlSignal::Stop),
        SIGHUP => Some(ControlSignal::Shutdown),
        SIGUSR1 => Some(ControlSignal::Rotate),
        SIGUSR2 => Some(ControlSignal::Break),
        _ => None,
    }
}
