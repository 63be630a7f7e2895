//! Scenario D: the log cannot be created, so the service never runs.

#![cfg(unix)]

use e2e_tests::{create_test_dir, fast_options, ServiceHarness};
use std::time::Duration;
use svcbatch_state::ServiceState;

#[test]
fn test_unwritable_log_directory() {
    println!("\n========================================");
    println!("TEST: Unwritable log directory");
    println!("========================================\n");

    let dir = create_test_dir("no-log");
    // A file where the log directory should be
    std::fs::write(dir.path().join("Logs"), b"not a directory").unwrap();

    let mut service = ServiceHarness::start_in(dir, "no-log", "echo never\n", fast_options());
    let code = service.wait_stopped(Duration::from_secs(10));

    assert_ne!(code, 0);
    let states = service.reporter.states();
    assert_eq!(states, vec![ServiceState::StartPending, ServiceState::Stopped]);

    let last = service.reporter.last().unwrap();
    assert_eq!(last.win32_exit_code, 1066);
    // ENOTDIR or EEXIST, depending on where creation fails
    assert_eq!(last.service_exit_code, code);
    assert!(code == 20 || code == 17, "unexpected code {}", code);
    println!("✓ TEST PASSED: Unwritable log directory\n");
}

#[test]
fn test_missing_interpreter() {
    let mut options = fast_options();
    options.shell = Some("/nonexistent/shell".into());
    let mut service = ServiceHarness::start("no-shell", "echo never\n", options);
    let code = service.wait_stopped(Duration::from_secs(10));

    // ENOENT
    assert_eq!(code, 2);
    assert!(!service.reporter.states().contains(&ServiceState::Running));
    assert!(service.read_log().contains("Child supervision failed"));
}
