//! # SvcBatch Service
//!
//! Runs a batch script as a managed background service:
//! - Resolves paths and builds the child's environment
//! - Supervises the interpreter and copies its output into a rotating log
//! - Maps service controls onto console interrupts, stdin answers and
//!   process tree termination
//! - Reports a forward-only status sequence to the service manager

pub mod config;
pub mod context;
pub mod controller;
pub mod environment;
pub mod eventlog;
pub mod job;
pub mod monitor;
pub mod stop;
pub mod supervisor;

pub use config::{FailMode, ServiceConfig, ServiceOptions, Timeouts};
pub use context::ServiceContext;
pub use controller::{ControlHandle, ServiceController};
pub use environment::{Environment, EnvironmentBuilder, ServiceIdentity};
pub use job::ChildJob;
pub use svcbatch_log::RotateTime;
