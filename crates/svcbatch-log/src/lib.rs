//! # svcbatch log
//!
//! Capture of the supervised child's output into a rotating log file.
//!
//! This crate provides:
//! - The log manager owning the single active log file and its numbered
//!   generations
//! - Structural status lines with an elapsed-time and thread prefix
//! - The output pipe reader that copies raw child output into the log
//! - The daily or interval schedule for time-based rotation

pub mod manager;
pub mod reader;
pub mod schedule;
mod thread;

pub use manager::{LogConfig, LogGuard, LogManager, MAX_LOGS};
pub use reader::{drain_output, PIPE_CHUNK};
pub use schedule::RotateTime;

/// Program name written to the log header.
pub const PROGRAM_NAME: &str = "SvcBatch";

/// Program version written to the log header.
pub const PROGRAM_VERSION: &str = env!("CARGO_PKG_VERSION");
