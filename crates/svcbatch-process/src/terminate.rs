//! Process termination primitives.

use svcbatch_common::{Error, Result};

/// Forcefully terminate a single process if it is still running.
///
/// `exit_code` becomes the process exit status on Windows; Unix has no
/// equivalent and delivers `SIGKILL`.
///
/// Returns `Ok(true)` if the process was running and has been told to die,
/// `Ok(false)` if it was already gone.
pub fn terminate(pid: u32, exit_code: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let _ = exit_code;
        if pid == 0 || pid > i32::MAX as u32 {
            return Ok(false);
        }
        match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => Ok(false),
            Err(e) => Err(Error::terminate(pid, e as i32 as u32, e.to_string())),
        }
    }

    #[cfg(windows)]
    {
        use crate::check::STILL_ACTIVE;
        use crate::win32::{win32_code, OwnedHandle};
        use svcbatch_common::codes::ERROR_INVALID_PARAMETER;
        use windows::Win32::System::Threading::{
            GetExitCodeProcess, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
            PROCESS_TERMINATE,
        };

        unsafe {
            let handle = match OpenProcess(
                PROCESS_TERMINATE | PROCESS_QUERY_LIMITED_INFORMATION,
                false,
                pid,
            ) {
                Ok(h) if !h.is_invalid() => OwnedHandle(h),
                Ok(_) => return Ok(false),
                Err(e) => {
                    let code = win32_code(&e);
                    if code == ERROR_INVALID_PARAMETER {
                        return Ok(false);
                    }
                    return Err(Error::terminate(pid, code, format!("OpenProcess failed: {}", e)));
                }
            };

            let mut status = 0u32;
            if GetExitCodeProcess(handle.0, &mut status).is_ok() && status != STILL_ACTIVE {
                return Ok(false);
            }

            TerminateProcess(handle.0, exit_code)
                .map(|_| true)
                .map_err(|e| {
                    Error::terminate(pid, win32_code(&e), format!("TerminateProcess failed: {}", e))
                })
        }
    }
}

/// Terminate an owned child that has not been reaped yet.
///
/// Going through the `Child` keeps the PID from being recycled under us.
pub fn terminate_child(child: &mut std::process::Child, exit_code: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let _ = exit_code;
        match child.kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(Error::terminate(
                child.id(),
                e.raw_os_error().unwrap_or(0) as u32,
                e.to_string(),
            )),
        }
    }

    #[cfg(windows)]
    {
        use crate::win32::win32_code;
        use std::os::windows::io::AsRawHandle;
        use windows::Win32::Foundation::HANDLE;
        use windows::Win32::System::Threading::TerminateProcess;

        let handle = HANDLE(child.as_raw_handle() as isize);
        unsafe {
            TerminateProcess(handle, exit_code).map_err(|e| {
                Error::terminate(child.id(), win32_code(&e), format!("TerminateProcess failed: {}", e))
            })
        }
    }
}
