//! Scenario A: a script that prints and exits, plus the fail modes for
//! children that end on their own.

#![cfg(unix)]

use e2e_tests::assertions::{assert_states, assert_stopped_with};
use e2e_tests::{fast_options, ServiceHarness};
use std::time::Duration;
use svcbatch_service::FailMode;
use svcbatch_state::ServiceState;

const RUN_TIMEOUT: Duration = Duration::from_secs(15);

#[test]
fn test_script_output_reaches_log() {
    println!("\n========================================");
    println!("TEST: Script output reaches log");
    println!("========================================\n");

    let mut service = ServiceHarness::start("hello", "echo hello\nexit 0\n", fast_options());
    let code = service.wait_stopped(RUN_TIMEOUT);
    assert_eq!(code, 0);

    let log = service.read_log();
    println!("{}", log);
    let header = log.lines().next().unwrap_or_default();
    assert!(header.contains("SvcBatch "), "missing header: {}", header);
    assert!(log.contains("Log opened"));
    assert!(log.contains("Service name"));
    assert!(log.contains("Service uuid"));
    assert!(log.contains("Batch file"));
    assert!(log.contains("Working directory"));
    assert!(log.contains("hello"));
    assert!(log.contains("Log closed"));
    assert!(log.find("Service name").unwrap() < log.find("hello").unwrap());
    assert!(log.find("hello").unwrap() < log.find("Log closed").unwrap());

    assert_states(
        &service.reporter,
        &[ServiceState::StartPending, ServiceState::Running, ServiceState::Stopped],
    )
    .unwrap();
    assert_stopped_with(&service.reporter, 0).unwrap();
    println!("✓ TEST PASSED: Script output reaches log\n");
}

#[test]
fn test_child_sees_service_identity() {
    let body = "\
echo \"name=$SVCBATCH_SERVICE_NAME\"
echo \"home=$SVCBATCH_SERVICE_HOME\"
echo \"pwd=$(pwd -P)\"
";
    let mut service = ServiceHarness::start("identity", body, fast_options());
    service.wait_stopped(RUN_TIMEOUT);

    let log = service.read_log();
    let work = service.context.config.work_dir.display().to_string();
    assert!(log.contains("name=identity"), "{}", log);
    assert!(log.contains(&format!("home={}", work)), "{}", log);
    assert!(log.contains(&format!("pwd={}", work)), "{}", log);
    assert!(log.contains(&service.context.uuid.to_string()));
}

#[test]
fn test_failing_child_reports_exit_code() {
    let mut service = ServiceHarness::start("fail-error", "exit 3\n", fast_options());
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 3);

    let last = service.reporter.last().unwrap();
    assert_eq!(last.state, ServiceState::Stopped);
    assert_eq!(last.win32_exit_code, 1066);
    assert_eq!(last.service_exit_code, 3);
    assert!(service.reporter.exits().is_empty());
}

#[test]
fn test_fail_mode_none_reports_success() {
    let mut options = fast_options();
    options.fail_mode = FailMode::None;
    let mut service = ServiceHarness::start("fail-none", "exit 3\n", options);
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    assert_stopped_with(&service.reporter, 0).unwrap();
}

#[test]
fn test_fail_mode_exit_exits_process() {
    let mut options = fast_options();
    options.fail_mode = FailMode::Exit;
    let mut service = ServiceHarness::start("fail-exit", "exit 4\n", options);
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 4);

    assert_eq!(service.reporter.exits(), vec![4]);
    // The process would be gone; Stopped is never published
    assert_ne!(service.reporter.last().unwrap().state, ServiceState::Stopped);
}

#[test]
fn test_batch_job_terminated_counts_as_stop() {
    let mut service = ServiceHarness::start("exit-255", "exit 255\n", fast_options());
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    assert_stopped_with(&service.reporter, 0).unwrap();
}
