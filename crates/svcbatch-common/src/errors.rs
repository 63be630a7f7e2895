//! Error types for svcbatch.
//!
//! Every error can be reduced to a numeric OS-style code with
//! [`Error::os_code`]; that code becomes the service-specific exit code when a
//! failure stops the service.

use crate::codes;
use thiserror::Error;

/// Result type alias for svcbatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for svcbatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A filesystem or pipe operation failed.
    #[error("Failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// The log file is not open.
    #[error("Log file is not open")]
    LogClosed,

    /// Invalid input or configuration.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// The child interpreter could not be spawned.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A worker thread could not be started.
    #[error("Failed to start {name} thread: {source}")]
    Thread {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Sending a signal or console event failed.
    #[error("Failed to signal process {pid}: {reason}")]
    Signal { pid: u32, code: u32, reason: String },

    /// Terminating a process failed.
    #[error("Failed to terminate process {pid}: {reason}")]
    Terminate { pid: u32, code: u32, reason: String },

    /// Talking to the platform service manager failed.
    #[error("Service manager error: {reason}")]
    ServiceManager { code: u32, reason: String },

    /// Internal error (shouldn't happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates an Io error for the named operation.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Creates a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a Spawn error.
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    /// Creates a Thread error.
    pub fn thread(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Thread {
            name: name.into(),
            source,
        }
    }

    /// Creates a Signal error.
    pub fn signal(pid: u32, code: u32, reason: impl Into<String>) -> Self {
        Self::Signal {
            pid,
            code,
            reason: reason.into(),
        }
    }

    /// Creates a Terminate error.
    pub fn terminate(pid: u32, code: u32, reason: impl Into<String>) -> Self {
        Self::Terminate {
            pid,
            code,
            reason: reason.into(),
        }
    }

    /// Creates a ServiceManager error.
    pub fn service_manager(code: u32, reason: impl Into<String>) -> Self {
        Self::ServiceManager {
            code,
            reason: reason.into(),
        }
    }

    /// Creates an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// OS-style error code carried by this error.
    ///
    /// I/O failures keep the raw OS error (errno on Unix, Win32 code on
    /// Windows). Everything else maps onto a Win32 code.
    pub fn os_code(&self) -> u32 {
        match self {
            Self::Io { source, .. } | Self::Spawn { source, .. } | Self::Thread { source, .. } => {
                io_code(source)
            }
            Self::LogClosed => codes::ERROR_INVALID_HANDLE,
            Self::Validation { .. } => codes::ERROR_INVALID_PARAMETER,
            Self::Signal { code, .. }
            | Self::Terminate { code, .. }
            | Self::ServiceManager { code, .. } => *code,
            Self::Internal(_) => codes::ERROR_PROCESS_ABORTED,
        }
    }
}

fn io_code(err: &std::io::Error) -> u32 {
    match err.raw_os_error() {
        Some(code) if code != 0 => code as u32,
        _ => match err.kind() {
            std::io::ErrorKind::NotFound => codes::ERROR_FILE_NOT_FOUND,
            std::io::ErrorKind::BrokenPipe => codes::ERROR_BROKEN_PIPE,
            std::io::ErrorKind::InvalidInput => codes::ERROR_INVALID_PARAMETER,
            _ => codes::ERROR_PROCESS_ABORTED,
        },
    }
}

/// Extension trait for attaching an operation name to I/O results.
pub trait ResultExt<T> {
    /// Converts an I/O error into [`Error::Io`] naming the failed operation.
    fn op<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn op<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
