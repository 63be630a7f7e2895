//! Process existence checking.

use svcbatch_common::{Error, Result};

/// Check if a process with the given PID exists and is running.
///
/// On Unix this uses `kill(pid, 0)`; on Windows it opens the process and
/// compares its exit code against `STILL_ACTIVE`.
///
/// # Returns
///
/// * `Ok(true)` - Process exists and is running
/// * `Ok(false)` - Process does not exist
/// * `Err(_)` - The check itself failed
pub fn process_exists(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        process_exists_unix(pid)
    }

    #[cfg(windows)]
    {
        process_exists_windows(pid)
    }
}

#[cfg(unix)]
fn process_exists_unix(pid: u32) -> Result<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u32 {
        return Ok(false);
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::ESRCH) => Ok(false),
        // Exists, owned by someone else
        Err(nix::errno::Errno::EPERM) => Ok(true),
        Err(e) => Err(Error::signal(pid, e as u32, format!("Failed to check process: {}", e))),
    }
}

#[cfg(windows)]
pub(crate) const STILL_ACTIVE: u32 = 259;

#[cfg(windows)]
fn process_exists_windows(pid: u32) -> Result<bool> {
    use crate::win32::{win32_code, OwnedHandle};
    use svcbatch_common::codes::{ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER};
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION,
    };

    unsafe {
        let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) {
            Ok(h) => OwnedHandle(h),
            Err(e) => {
                let code = win32_code(&e);
                if code == ERROR_INVALID_PARAMETER {
                    return Ok(false);
                }
                if code == ERROR_ACCESS_DENIED {
                    return Ok(true);
                }
                return Err(Error::signal(pid, code, format!("Failed to check process: {}", e)));
            }
        };

        let mut exit_code = 0u32;
        match GetExitCodeProcess(handle.0, &mut exit_code) {
            Ok(()) => Ok(exit_code == STILL_ACTIVE),
            Err(e) => Err(Error::signal(pid, win32_code(&e), format!("GetExitCodeProcess failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_exists() {
        assert!(process_exists(std::process::id()).unwrap());
    }

    #[test]
    fn test_pid_zero_is_not_a_process() {
        #[cfg(unix)]
        assert!(!process_exists(0).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn test_reaped_child_is_gone() {
        let mut child = std::process::Command::new("/bin/sh")
            .arg("-c")
            .arg("exit 0")
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_exists(pid).unwrap());
    }
}
