//! Wall-clock access.
//!
//! Timestamps are Unix epoch seconds as `f64`, matching what peers put on the
//! wire. Components that enforce time windows take a [`Clock`] so tests can
//! drive time explicitly.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current Unix time in (fractional) seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// The operating-system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        unix_now()
    }
}

/// Current Unix time in seconds. A clock set before 1970 reads as zero.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
