//! Time-based rotation schedule.
//!
//! Written as `0` (midnight), `hh:mm:ss` (once a day at that time) or
//! `<N>m` (every N minutes).

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use svcbatch_common::Error;

/// Longest interval accepted by the `<N>m` form: one day.
pub const MAX_ROTATE_MINUTES: u32 = 1440;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateTime {
    /// Once a day at the given local time.
    Daily(NaiveTime),
    /// Every given number of minutes.
    Every(u32),
}

impl RotateTime {
    /// First rotation strictly after `now`.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match *self {
            RotateTime::Daily(at) => {
                let today = now.date().and_time(at);
                if today > now {
                    today
                } else {
                    today + TimeDelta::days(1)
                }
            }
            RotateTime::Every(minutes) => now + TimeDelta::minutes(i64::from(minutes)),
        }
    }
}

impl FromStr for RotateTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "0" {
            return Ok(RotateTime::Daily(NaiveTime::MIN));
        }
        if let Some(minutes) = s.strip_suffix(['m', 'M']) {
            let minutes: u32 = minutes
                .parse()
                .map_err(|_| Error::validation(format!("Invalid rotate time: {}", s)))?;
            if minutes == 0 || minutes > MAX_ROTATE_MINUTES {
                return Err(Error::validation(format!(
                    "Rotate interval must be between 1 and {} minutes, got: {}",
                    MAX_ROTATE_MINUTES, minutes
                )));
            }
            return Ok(RotateTime::Every(minutes));
        }
        NaiveTime::parse_from_str(s, "%H:%M:%S")
            .map(RotateTime::Daily)
            .map_err(|_| {
                Error::validation(format!(
                    "Invalid rotate time: {}, must be 0, hh:mm:ss or <minutes>m",
                    s
                ))
            })
    }
}

impl fmt::Display for RotateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotateTime::Daily(at) if *at == NaiveTime::MIN => write!(f, "0"),
            RotateTime::Daily(at) => write!(f, "{}", at.format("%H:%M:%S")),
            RotateTime::Every(minutes) => write!(f, "{}m", minutes),
        }
    }
}

/// Current local wall-clock time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Time left from `now` until `deadline`, zero once it has passed.
pub fn until(deadline: NaiveDateTime, now: NaiveDateTime) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}
