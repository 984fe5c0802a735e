//! Nullable clock: deterministic time for testing.

use beacon_types::Clock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Safe to share across tasks.
#[derive(Debug)]
pub struct NullClock {
    /// Bit pattern of the current `f64` Unix time.
    current: AtomicU64,
}

impl NullClock {
    pub fn new(initial_secs: f64) -> Self {
        Self {
            current: AtomicU64::new(initial_secs.to_bits()),
        }
    }

    /// Advance time by a number of seconds.
    pub fn advance(&self, secs: f64) {
        let now = self.now();
        self.set(now + secs);
    }

    /// Set the time to a specific value.
    pub fn set(&self, secs: f64) {
        self.current.store(secs.to_bits(), Ordering::SeqCst);
    }
}

impl Default for NullClock {
    fn default() -> Self {
        Self::new(1_700_000_000.0)
    }
}

impl Clock for NullClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.current.load(Ordering::SeqCst))
    }
}
