//! Small helpers shared by the Windows code paths.

use windows::Win32::Foundation::{CloseHandle, HANDLE};

/// Owned process handle, closed on drop.
pub(crate) struct OwnedHandle(pub(crate) HANDLE);

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.0);
            }
        }
    }
}

/// Win32 error code carried by a `windows` crate error.
pub(crate) fn win32_code(err: &windows::core::Error) -> u32 {
    (err.code().0 as u32) & 0xFFFF
}
