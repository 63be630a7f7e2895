//! Console and process-group signals.
//!
//! On Windows the child shares the service console: interrupts are console
//! control events broadcast to the whole console, so this process ignores
//! them while a broadcast is in flight. On Unix the child leads its own
//! process group and receives group signals directly.

use svcbatch_common::Result;

#[cfg(windows)]
use std::sync::Mutex;

/// Serializes console handler changes and console event broadcasts.
#[cfg(windows)]
static CONSOLE_OPERATION_LOCK: Mutex<()> = Mutex::new(());

/// Keeps this process deaf to its own interrupt broadcast until dropped.
#[must_use = "the interrupt may still be in flight"]
pub struct InterruptGuard {
    #[cfg(windows)]
    _private: (),
}

#[cfg(windows)]
impl Drop for InterruptGuard {
    fn drop(&mut self) {
        use windows::Win32::System::Console::SetConsoleCtrlHandler;

        let _lock = CONSOLE_OPERATION_LOCK.lock();
        unsafe {
            let _ = SetConsoleCtrlHandler(None, false);
        }
    }
}

/// Deliver the Ctrl-C equivalent to the child's process group.
///
/// The returned guard must outlive the wait for the child to react.
pub fn interrupt(pid: u32) -> Result<InterruptGuard> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGINT)?;
        Ok(InterruptGuard {})
    }

    #[cfg(windows)]
    {
        use crate::win32::win32_code;
        use svcbatch_common::Error;
        use windows::Win32::System::Console::{
            GenerateConsoleCtrlEvent, SetConsoleCtrlHandler, CTRL_C_EVENT,
        };

        let lock = CONSOLE_OPERATION_LOCK
            .lock()
            .map_err(|e| Error::internal(format!("Failed to acquire console lock: {}", e)))?;
        unsafe {
            SetConsoleCtrlHandler(None, true).map_err(|e| {
                Error::signal(pid, win32_code(&e), format!("SetConsoleCtrlHandler failed: {}", e))
            })?;
            let guard = InterruptGuard { _private: () };
            GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0).map_err(|e| {
                Error::signal(pid, win32_code(&e), format!("GenerateConsoleCtrlEvent failed: {}", e))
            })?;
            drop(lock);
            Ok(guard)
        }
    }
}

/// Deliver the Ctrl-Break equivalent to the child's process group.
///
/// `own_group` tells whether the child was started as a process group leader
/// (Windows only; Unix children always lead their group).
pub fn send_break(pid: u32, own_group: bool) -> Result<()> {
    #[cfg(unix)]
    {
        let _ = own_group;
        signal_group(pid, nix::sys::signal::Signal::SIGQUIT)
    }

    #[cfg(windows)]
    {
        use crate::win32::win32_code;
        use svcbatch_common::Error;
        use windows::Win32::System::Console::{
            GenerateConsoleCtrlEvent, SetConsoleCtrlHandler, CTRL_BREAK_EVENT,
        };

        let _lock = CONSOLE_OPERATION_LOCK
            .lock()
            .map_err(|e| Error::internal(format!("Failed to acquire console lock: {}", e)))?;
        let group = if own_group { pid } else { 0 };
        unsafe {
            if group == 0 {
                let _ = SetConsoleCtrlHandler(None, true);
            }
            let result = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, group).map_err(|e| {
                Error::signal(pid, win32_code(&e), format!("GenerateConsoleCtrlEvent failed: {}", e))
            });
            if group == 0 {
                // Give the broadcast time to pass before listening again
                std::thread::sleep(std::time::Duration::from_millis(100));
                let _ = SetConsoleCtrlHandler(None, false);
            }
            result
        }
    }
}

/// Make sure this process owns a console the child can share.
///
/// Services start without one. Harmless when a console already exists.
#[cfg(windows)]
pub fn ensure_console() {
    use windows::Win32::System::Console::{AllocConsole, GetConsoleWindow};
    use windows::Win32::UI::WindowsAndMessaging::{ShowWindow, SW_HIDE};

    let _lock = CONSOLE_OPERATION_LOCK.lock();
    unsafe {
        if GetConsoleWindow().0 == 0 && AllocConsole().is_ok() {
            let window = GetConsoleWindow();
            if window.0 != 0 {
                let _ = ShowWindow(window, SW_HIDE);
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> Result<()> {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;
    use svcbatch_common::Error;

    if pid == 0 || pid > i32::MAX as u32 {
        return Err(Error::signal(pid, svcbatch_common::codes::ERROR_INVALID_PARAMETER, "invalid process id"));
    }
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) => Ok(()),
        // Group already gone: nothing left to signal
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(Error::signal(pid, e as i32 as u32, format!("killpg({}) failed: {}", signal, e))),
    }
}

/// Kill every process left in the child's process group.
///
/// Catches orphans that were reparented away from the child. No-op on Windows,
/// where the tree sweep still sees them through their recorded parent.
pub fn kill_group(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, nix::sys::signal::Signal::SIGKILL)
    }

    #[cfg(windows)]
    {
        let _ = pid;
        Ok(())
    }
}
