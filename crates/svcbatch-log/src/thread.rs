//! Numeric id of the calling thread for log line prefixes.

#[cfg(windows)]
pub(crate) fn current_thread_id() -> u32 {
    unsafe { windows::Win32::System::Threading::GetCurrentThreadId() }
}

#[cfg(target_os = "linux")]
pub(crate) fn current_thread_id() -> u32 {
    nix::unistd::gettid().as_raw() as u32
}

#[cfg(not(any(windows, target_os = "linux")))]
pub(crate) fn current_thread_id() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_ID: AtomicU32 = AtomicU32::new(1);
    thread_local! {
        static ID: u32 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}
