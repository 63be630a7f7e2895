//! # svcbatch common
//!
//! Shared building blocks for the svcbatch service wrapper.
//!
//! This crate provides:
//! - The error taxonomy and its mapping to OS-style exit codes
//! - Win32-style numeric codes reported to the service manager
//! - Event and run-once primitives used between the service threads
//! - The control signal vocabulary and its pending-signal slot

pub mod codes;
pub mod errors;
pub mod sync;
pub mod types;

pub use errors::{Error, Result, ResultExt};
pub use sync::{Event, OnceFlag};
pub use types::{ControlSignal, SignalSlot};
