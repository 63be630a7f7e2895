//! Win32-style status codes.
//!
//! The service manager speaks in Windows error numbers regardless of the host,
//! so the same constants are used for exit codes on every platform.

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_FILE_NOT_FOUND: u32 = 2;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_ARENA_TRASHED: u32 = 7;
pub const ERROR_BAD_ENVIRONMENT: u32 = 10;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_BROKEN_PIPE: u32 = 109;
pub const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
pub const ERROR_INVALID_LEVEL: u32 = 124;
pub const ERROR_NO_DATA: u32 = 232;
pub const ERROR_INVALID_SERVICE_CONTROL: u32 = 1052;
pub const ERROR_SERVICE_SPECIFIC_ERROR: u32 = 1066;
pub const ERROR_PROCESS_ABORTED: u32 = 1067;
pub const ERROR_FAILED_SERVICE_CONTROLLER_CONNECT: u32 = 1063;

/// Exit status of a console process terminated by Ctrl-C.
pub const STATUS_CONTROL_C_EXIT: u32 = 0xC000_013A;

/// Exit code `cmd.exe` returns after the "Terminate batch job" prompt is answered.
pub const BATCH_JOB_TERMINATED: u32 = 255;

/// Child exit codes that are the expected outcome of a requested stop.
pub fn is_stop_exit_code(code: u32) -> bool {
    code == STATUS_CONTROL_C_EXIT || code == BATCH_JOB_TERMINATED
}
