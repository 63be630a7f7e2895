//! # svcbatch process
//!
//! Low-level process operations for the service wrapper.
//!
//! This crate provides cross-platform primitives for:
//! - Building the interpreter command and spawning the child with a combined
//!   output pipe and a writable stdin
//! - Delivering interrupt and break signals to the child's process group
//! - Terminating single processes and whole process trees
//! - Process existence verification

pub mod check;
pub mod command;
pub mod signal;
pub mod terminate;
pub mod tree;

#[cfg(windows)]
mod win32;

pub use check::*;
pub use command::*;
pub use signal::*;
pub use terminate::*;
pub use tree::*;
