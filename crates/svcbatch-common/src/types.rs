//! Control signal vocabulary.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Control codes a running service can receive.
///
/// The numeric values are the service manager's control codes; `Break` and
/// `Rotate` live in the user-defined range (128..=255).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlSignal {
    Stop = 0x0000_0001,
    Interrogate = 0x0000_0004,
    Shutdown = 0x0000_0005,
    PreShutdown = 0x0000_000F,
    Break = 233,
    Rotate = 234,
}

impl ControlSignal {
    /// Map a raw control code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0x01 => Some(Self::Stop),
            0x04 => Some(Self::Interrogate),
            0x05 => Some(Self::Shutdown),
            0x0F => Some(Self::PreShutdown),
            233 => Some(Self::Break),
            234 => Some(Self::Rotate),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::Stop => write!(f, "STOP"),
            ControlSignal::Interrogate => write!(f, "INTERROGATE"),
            ControlSignal::Shutdown => write!(f, "SHUTDOWN"),
            ControlSignal::PreShutdown => write!(f, "PRESHUTDOWN"),
            ControlSignal::Break => write!(f, "CTRL_BREAK"),
            ControlSignal::Rotate => write!(f, "ROTATE"),
        }
    }
}

/// Single pending-signal slot.
///
/// Holds at most one custom signal. A newer post overwrites an unconsumed
/// older one: only the latest request matters.
#[derive(Debug, Default)]
pub struct SignalSlot {
    pending: AtomicU32,
}

impl SignalSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `signal`, returning the unconsumed signal it replaced.
    pub fn post(&self, signal: ControlSignal) -> Option<ControlSignal> {
        ControlSignal::from_code(self.pending.swap(signal.code(), Ordering::AcqRel))
    }

    /// Take and clear the pending signal.
    pub fn take(&self) -> Option<ControlSignal> {
        ControlSignal::from_code(self.pending.swap(0, Ordering::AcqRel))
    }

    pub fn clear(&self) {
        self.pending.store(0, Ordering::Release);
    }
}
