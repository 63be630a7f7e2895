//! Scenario B: stopping a running script, with each escalation step and the
//! optional stop script.

#![cfg(unix)]

use e2e_tests::assertions::{assert_occurrences, assert_stopped_with};
use e2e_tests::{create_test_dir, fast_options, wait_for, write_script, ServiceHarness};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use svcbatch_common::ControlSignal;
use svcbatch_service::ServiceOptions;
use svcbatch_state::ServiceState;

const RUN_TIMEOUT: Duration = Duration::from_secs(20);
const STARTUP: Duration = Duration::from_secs(10);

#[test]
fn test_stop_interrupts_sleeping_child() {
    println!("\n========================================");
    println!("TEST: Stop interrupts sleeping child");
    println!("========================================\n");

    let mut service =
        ServiceHarness::start("stop-interrupt", "echo started\nsleep 30\n", fast_options());
    assert!(service.wait_for_log("started", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let begin = Instant::now();
    service.control(ControlSignal::Stop).unwrap();
    let code = service.wait_stopped(RUN_TIMEOUT);
    let elapsed = begin.elapsed();

    assert_eq!(code, 0);
    assert_stopped_with(&service.reporter, 0).unwrap();
    // Interrupt alone is enough, no escalation to the hard stop
    assert!(elapsed < Duration::from_secs(2), "stop took {:?}", elapsed);

    let log = service.read_log();
    assert!(log.contains("Service STOP signaled"));
    assert!(!log.contains("terminating process tree"));
    assert!(service
        .reporter
        .states()
        .ends_with(&[ServiceState::Running, ServiceState::StopPending, ServiceState::Stopped]));
    println!("✓ TEST PASSED: Stop interrupts sleeping child\n");
}

#[test]
fn test_stop_answers_prompt_on_stdin() {
    let body = "trap '' INT\necho waiting\nread answer\necho \"answer=$answer\"\nexit 0\n";
    let mut service = ServiceHarness::start("stop-answer", body, fast_options());
    assert!(service.wait_for_log("waiting", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);

    let log = service.read_log();
    assert!(log.contains("answer=Y"), "{}", log);
    assert!(!log.contains("terminating process tree"));
}

#[cfg(target_os = "linux")]
#[test]
fn test_stop_kills_stubborn_tree() {
    use e2e_tests::is_alive;

    let body = "trap '' INT\nsleep 300 &\necho \"bg=$!\"\nexec 0<&-\nwhile :; do sleep 1; done\n";
    let mut service = ServiceHarness::start("stop-kill", body, fast_options());
    assert!(service.wait_for_log("bg=", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let log = service.read_log();
    let background: u32 = log
        .lines()
        .find_map(|line| line.trim().strip_prefix("bg="))
        .and_then(|pid| pid.trim().parse().ok())
        .expect("background pid not logged");
    assert!(is_alive(background));

    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);

    let log = service.read_log();
    assert!(log.contains("terminating process tree"), "{}", log);
    assert!(wait_for(Duration::from_secs(5), || !is_alive(background)));
    assert_stopped_with(&service.reporter, 0).unwrap();
}

#[test]
fn test_concurrent_stops_run_once() {
    let mut service = ServiceHarness::start("stop-once", "echo up\nsleep 30\n", fast_options());
    assert!(service.wait_for_log("up", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let barrier = Arc::new(std::sync::Barrier::new(4));
    let stoppers: Vec<_> = (0..4)
        .map(|i| {
            let handle = service.handle.clone();
            let barrier = barrier.clone();
            let signal = if i % 2 == 0 {
                ControlSignal::Stop
            } else {
                ControlSignal::Shutdown
            };
            thread::spawn(move || {
                barrier.wait();
                handle.control(signal)
            })
        })
        .collect();
    for stopper in stoppers {
        assert!(stopper.join().unwrap().is_ok());
    }

    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    assert_occurrences(&service.read_log(), "Service STOP signaled", 1).unwrap();

    // Stop after Stopped is a no-op
    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.reporter.last().unwrap().state, ServiceState::Stopped);
}

#[test]
fn test_stop_script_ends_child_before_interrupt() {
    let dir = create_test_dir("stop-script");
    let stop = write_script(dir.path(), "stop.sh", "echo stop-script-ran\ntouch stopped\n");
    let options = ServiceOptions {
        stop_script: Some(stop),
        ..fast_options()
    };
    // Ignores the interrupt; only the stop script can end it
    let body = "trap '' INT\necho up\nwhile [ ! -f stopped ]; do sleep 0.05; done\necho main-done\n";
    let mut service = ServiceHarness::start_in(dir, "stop-script", body, options);
    assert!(service.wait_for_log("up", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let begin = Instant::now();
    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    // Well within stop_hint, so the interrupt was never needed
    assert!(begin.elapsed() < Duration::from_secs(2), "stop took {:?}", begin.elapsed());

    let log = service.read_log();
    let ran = log.find("stop-script-ran").expect("stop script output missing");
    let done = log.find("main-done").expect("child did not finish");
    assert!(ran < done, "{}", log);
    assert!(log.contains("Stop script exited with code 0"));
    assert!(!log.contains("terminating process tree"));
    assert_stopped_with(&service.reporter, 0).unwrap();
}

#[test]
fn test_stop_continues_after_idle_stop_script() {
    let dir = create_test_dir("stop-script-idle");
    let stop = write_script(dir.path(), "stop.sh", "echo nothing-to-do\n");
    let options = ServiceOptions {
        stop_script: Some(stop),
        ..fast_options()
    };
    let mut service =
        ServiceHarness::start_in(dir, "stop-script-idle", "echo up\nsleep 30\n", options);
    assert!(service.wait_for_log("up", STARTUP));
    assert!(service.wait_for_state(ServiceState::Running, STARTUP));

    let begin = Instant::now();
    service.control(ControlSignal::Stop).unwrap();
    assert_eq!(service.wait_stopped(RUN_TIMEOUT), 0);
    // stop_hint passes before the interrupt ends the child
    assert!(begin.elapsed() >= Duration::from_secs(2), "stop took {:?}", begin.elapsed());

    let log = service.read_log();
    assert!(log.contains("nothing-to-do"));
    assert!(log.contains("Stop script exited with code 0"));
    assert!(!log.contains("terminating process tree"));
}
