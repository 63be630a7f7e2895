//! Scenario C: rotating the log while the script keeps writing.

#![cfg(unix)]

use e2e_tests::{fast_options, read_lossy, wait_for, ServiceHarness};
use std::time::Duration;
use svcbatch_common::ControlSignal;
use svcbatch_log::manager::generation_path;
use svcbatch_state::ServiceState;

const RUN_TIMEOUT: Duration = Duration::from_secs(15);
const STARTUP: Duration = Duration::from_secs(10);

/// Prints a marker, then waits for a file before printing the next one.
const TWO_PHASE_SCRIPT: &str = "\
echo before-rotate
while [ ! -f go ]; do sleep 0.05; done
echo after-rotate
exit 0
";

#[test]
fn test_rotate_mid_run() {
    println!("\n========================================");
    println!("TEST: Rotate mid run");
    println!("========================================\n");

    let mut service = ServiceHarness::start("rotate", TWO_PHASE_SCRIPT, fast_options());
    assert!(service.wait_for_log("before-rotate", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    service.control(ControlSignal::Rotate).unwrap();
    assert!(wait_for(STARTUP, || service.context.log.generation() == 1));

    std::fs::write(service.dir.path().join("go"), b"").unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);

    let primary = service.read_log();
    let previous = read_lossy(&generation_path(&service.log_path(), 0));
    println!("previous:\n{}\nprimary:\n{}", previous, primary);

    assert_eq!(previous.matches("before-rotate").count(), 1);
    assert!(!previous.contains("after-rotate"));

    assert_eq!(primary.matches("after-rotate").count(), 1);
    assert!(!primary.contains("before-rotate"));
    assert!(primary.contains("Log generation 1"));
    assert!(primary.contains("Service name"));
    println!("✓ TEST PASSED: Rotate mid run\n");
}

#[test]
fn test_rotate_by_size() {
    let body = "\
i=0
while [ $i -lt 64 ]; do
  echo \"line $i ................................................................\"
  i=$((i + 1))
done
while [ ! -f go ]; do sleep 0.05; done
echo tail-line
exit 0
";
    let mut options = fast_options();
    options.rotate_size = Some(2048);
    let mut service = ServiceHarness::start("rotate-size", body, options);

    assert!(wait_for(STARTUP, || service.context.log.generation() >= 1));
    std::fs::write(service.dir.path().join("go"), b"").unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);

    // Every output line ends up in exactly one generation
    let mut combined = String::new();
    for generation in (0..9).rev() {
        combined.push_str(&read_lossy(&generation_path(&service.log_path(), generation)));
    }
    combined.push_str(&service.read_log());
    for i in 0..64 {
        let needle = format!("line {} ", i);
        assert_eq!(combined.matches(&needle).count(), 1, "{}", needle);
    }
    assert_eq!(combined.matches("tail-line").count(), 1);
}

#[test]
fn test_previous_run_kept_on_restart() {
    let dir = e2e_tests::create_test_dir("restart");
    let mut first = ServiceHarness::start_in(dir, "restart", "echo first-run\n", fast_options());
    first.wait_stopped(RUN_TIMEOUT);
    let log_path = first.log_path();

    // Keep the directory alive for the second run
    let dir = std::mem::replace(&mut first.dir, e2e_tests::create_test_dir("restart-spare"));
    let mut second = ServiceHarness::start_in(dir, "restart", "echo second-run\n", fast_options());
    second.wait_stopped(RUN_TIMEOUT);

    assert!(read_lossy(&generation_path(&log_path, 0)).contains("first-run"));
    let current = read_lossy(&log_path);
    assert!(current.contains("second-run"));
    assert!(!current.contains("first-run"));
}
