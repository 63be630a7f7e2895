//! Custom controls: break forwarding and interrogate.

#![cfg(unix)]

use e2e_tests::{fast_options, ServiceHarness};
use std::time::Duration;
use svcbatch_common::codes::ERROR_INVALID_SERVICE_CONTROL;
use svcbatch_common::ControlSignal;
use svcbatch_state::ServiceState;

const RUN_TIMEOUT: Duration = Duration::from_secs(15);
const STARTUP: Duration = Duration::from_secs(10);

const BREAK_SCRIPT: &str = "\
trap 'echo got-break' QUIT
echo ready
while [ ! -f go ]; do sleep 0.05; done
exit 0
";

#[test]
fn test_break_forwarded_when_enabled() {
    let mut options = fast_options();
    options.enable_break = true;
    let mut service = ServiceHarness::start("break", BREAK_SCRIPT, options);
    assert!(service.wait_for_log("ready", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    service.control(ControlSignal::Break).unwrap();
    assert!(service.wait_for_log("got-break", STARTUP), "{}", service.read_log());
    assert!(service.read_log().contains("CTRL_BREAK signaled"));

    std::fs::write(service.dir.path().join("go"), b"").unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
}

#[test]
fn test_break_rejected_when_disabled() {
    let mut service = ServiceHarness::start("no-break", BREAK_SCRIPT, fast_options());
    assert!(service.wait_for_log("ready", STARTUP));

    assert_eq!(
        service.control(ControlSignal::Break),
        Err(ERROR_INVALID_SERVICE_CONTROL)
    );

    std::fs::write(service.dir.path().join("go"), b"").unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    assert!(!service.read_log().contains("got-break"));
}

#[test]
fn test_interrogate_reannounces_status() {
    let mut service = ServiceHarness::start("interrogate", "sleep 30\n", fast_options());
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let before = service.reporter.statuses().len();
    service.control(ControlSignal::Interrogate).unwrap();
    let statuses = service.reporter.statuses();
    assert_eq!(statuses.len(), before + 1);
    assert_eq!(statuses[before].state, ServiceState::Running);
    assert_eq!(statuses[before], statuses[before - 1]);

    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
}
