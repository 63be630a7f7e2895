//! Custom assertions for E2E tests

use crate::RecordingReporter;
use svcbatch_state::ServiceState;

/// Assert the reported states form `expected`, ignoring repeats
pub fn assert_states(reporter: &RecordingReporter, expected: &[ServiceState]) -> Result<(), String> {
    let states = reporter.states();
    if states == expected {
        Ok(())
    } else {
        Err(format!("Expected states {:?}, got {:?}", expected, states))
    }
}

/// Assert the final status is `Stopped` with `code`
pub fn assert_stopped_with(reporter: &RecordingReporter, code: u32) -> Result<(), String> {
    let last = reporter.last().ok_or("No status was reported")?;
    if last.state != ServiceState::Stopped {
        return Err(format!("Last state is {}, expected STOPPED", last.state));
    }
    if last.exit_code() != code {
        return Err(format!(
            "Stopped with code {} (win32 {}), expected {}",
            last.exit_code(),
            last.win32_exit_code,
            code
        ));
    }
    Ok(())
}

/// Assert `needle` occurs exactly `count` times
pub fn assert_occurrences(log: &str, needle: &str, count: usize) -> Result<(), String> {
    let found = log.matches(needle).count();
    if found == count {
        Ok(())
    } else {
        Err(format!("Expected {} occurrences of {:?}, found {}:\n{}", count, needle, found, log))
    }
}
