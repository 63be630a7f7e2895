//! Handle to the running child, shared by the supervisor and the stop
//! sequence.

use parking_lot::Mutex;
use std::io::Write;
use std::process::{Child, ChildStdin, ExitStatus};
use std::time::{Duration, Instant};
use svcbatch_common::{Error, Result, ResultExt};
use svcbatch_process::terminate_child;
use tracing::debug;

/// How often the supervisor checks whether the child has exited.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub struct ChildJob {
    pid: u32,
    // Owning the handle keeps the pid from being reused while we may
    // still terminate it.
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    exit_code: Mutex<Option<u32>>,
}

impl ChildJob {
    pub fn new(child: Child, stdin: ChildStdin) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
            stdin: Mutex::new(Some(stdin)),
            exit_code: Mutex::new(None),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit code once the child has been reaped.
    pub fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock()
    }

    pub fn is_running(&self) -> bool {
        self.exit_code.lock().is_none()
    }

    /// Reap the child if it has exited.
    pub fn try_wait(&self) -> Result<Option<u32>> {
        let mut child = self.child.lock();
        let status = child.try_wait().op(|| format!("wait for child {}", self.pid))?;
        Ok(status.map(|status| self.record_exit(status)))
    }

    /// Block until the child exits, polling every [`EXIT_POLL_INTERVAL`].
    pub fn wait(&self) -> Result<u32> {
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(code);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Like [`ChildJob::wait`] but gives up after `timeout` with `None`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<u32>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(code) = self.try_wait()? {
                return Ok(Some(code));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Forcefully end the child unless it already exited.
    pub fn terminate(&self, exit_code: u32) -> Result<()> {
        let mut child = self.child.lock();
        if let Some(status) = child.try_wait().op(|| format!("wait for child {}", self.pid))? {
            self.record_exit(status);
            return Ok(());
        }
        terminate_child(&mut child, exit_code)
    }

    /// Write to the child's stdin. A child that closed its end is not an error.
    pub fn write_stdin(&self, data: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock();
        let Some(pipe) = stdin.as_mut() else {
            return Ok(());
        };
        match pipe.write_all(data).and_then(|_| pipe.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(pid = self.pid, "Child stdin already closed");
                *stdin = None;
                Ok(())
            }
            Err(e) => Err(Error::io(format!("write to stdin of child {}", self.pid), e)),
        }
    }

    pub fn close_stdin(&self) {
        self.stdin.lock().take();
    }

    fn record_exit(&self, status: ExitStatus) -> u32 {
        let code = exit_code_of(status);
        *self.exit_code.lock() = Some(code);
        code
    }
}

/// Map an exit status to a Win32-style exit code.
///
/// Unix children ended by a signal report `128 + signal`, as shells do.
pub fn exit_code_of(status: ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal as u32;
        }
    }
    svcbatch_common::codes::ERROR_PROCESS_ABORTED
}
