use super::*;
use anyhow::{anyhow, Result};

/// Validate service options
pub fn validate_options(options: &ServiceOptions) -> Result<()> {
    if options.max_logs > MAX_LOGS {
        return Err(anyhow!(
            "max_logs must be between 0 and {}, got: {}",
            MAX_LOGS,
            options.max_logs
        ));
    }

    if options.rotate_size == Some(0) {
        return Err(anyhow!("rotate_size must be greater than 0"));
    }

    if options.kill_depth == Some(0) {
        return Err(anyhow!("kill_depth must be greater than 0"));
    }

    validate_timeouts(&options.timeouts)
}

fn validate_timeouts(timeouts: &Timeouts) -> Result<()> {
    let named = [
        ("pending_interval", timeouts.pending_interval),
        ("start_hint", timeouts.start_hint),
        ("stop_hint", timeouts.stop_hint),
        ("stop_timeout", timeouts.stop_timeout),
    ];
    for (name, value) in named {
        if value.is_zero() {
            return Err(anyhow!("{} must be greater than 0", name));
        }
    }

    if timeouts.stop_timeout < timeouts.pending_interval {
        return Err(anyhow!(
            "stop_timeout ({:?}) must not be shorter than pending_interval ({:?})",
            timeouts.stop_timeout,
            timeouts.pending_interval
        ));
    }

    Ok(())
}
