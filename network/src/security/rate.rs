//! Sliding-window rate tracking.

use std::collections::VecDeque;

/// Timestamps of recent events for one IP, oldest first.
///
/// The window never holds more entries than the limit it is checked
/// against, so memory per IP stays bounded.
#[derive(Debug, Default, Clone)]
pub struct RateWindow {
    times: VecDeque<f64>,
}

impl RateWindow {
    /// Drop entries older than `window` seconds before `now`.
    pub fn prune(&mut self, now: f64, window: f64) {
        while let Some(&oldest) = self.times.front() {
            if now - oldest > window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether `limit` events already happened inside the window.
    pub fn is_full(&mut self, now: f64, window: f64, limit: usize) -> bool {
        self.prune(now, window);
        self.times.len() >= limit
    }

    /// Record an event, keeping at most `cap` entries.
    pub fn record(&mut self, now: f64, cap: usize) {
        self.times.push_back(now);
        while self.times.len() > cap.max(1) {
            self.times.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_the_window() {
        let mut w = RateWindow::default();
        w.record(100.0, 10);
        w.record(130.0, 10);
        assert!(!w.is_full(150.0, 60.0, 3));
        assert_eq!(w.len(), 2);

        // Exactly 60 s old is still inside the window.
        w.prune(160.0, 60.0);
        assert_eq!(w.len(), 2);

        w.prune(160.5, 60.0);
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn full_at_the_limit() {
        let mut w = RateWindow::default();
        for i in 0..3 {
            w.record(i as f64, 3);
        }
        assert!(w.is_full(10.0, 60.0, 3));
        assert!(!w.is_full(10.0, 60.0, 4));
    }

    #[test]
    fn record_is_capped() {
        let mut w = RateWindow::default();
        for i in 0..50 {
            w.record(i as f64, 5);
        }
        assert_eq!(w.len(), 5);
    }
}
