//! Synchronization primitives shared by the service threads.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Manual-reset event.
///
/// Once set, every waiter is released and the event stays signaled until
/// [`Event::reset`] is called.
#[derive(Debug, Default)]
pub struct Event {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    /// Create a new event in the given initial state.
    pub fn new(initially_set: bool) -> Self {
        Self {
            signaled: Mutex::new(initially_set),
            cond: Condvar::new(),
        }
    }

    /// Signal the event and wake all waiters.
    pub fn set(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.signaled.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.signaled.lock()
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    /// Block until the event is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                return *signaled;
            }
        }
        true
    }
}

/// Start-once guard.
///
/// Exactly one caller of [`OnceFlag::try_begin`] wins for the lifetime of the
/// flag; everybody else gets `false`.
#[derive(Debug, Default)]
pub struct OnceFlag {
    started: AtomicBool,
}

impl OnceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag. Returns `true` for the single winning caller.
    pub fn try_begin(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }
}
