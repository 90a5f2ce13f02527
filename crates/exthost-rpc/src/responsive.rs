//! Responsiveness tracking for one RPC channel.

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::Instant;

/// Coarse health of the other side, derived from acknowledgement latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponsiveState {
    Responsive,
    Unresponsive,
}

/// Round-trip latency of completed calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub avg_ms: f64,
    pub last_ms: f64,
    samples: u64,
}

impl LatencyStats {
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        self.last_ms = ms;
        if self.samples == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
            self.avg_ms = ms;
        } else {
            if ms < self.min_ms {
                self.min_ms = ms;
            }
            if ms > self.max_ms {
                self.max_ms = ms;
            }
            let total = self.avg_ms * self.samples as f64 + ms;
            self.avg_ms = total / (self.samples as f64 + 1.0);
        }
        self.samples = self.samples.saturating_add(1);
    }

    #[must_use]
    pub fn samples(&self) -> u64 {
        self.samples
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            min_ms: 0.0,
            max_ms: 0.0,
            avg_ms: 0.0,
            last_ms: 0.0,
            samples: 0,
        }
    }
}

/// Tracks requests that have not been acknowledged yet.
///
/// The channel flips to `Unresponsive` when the oldest unacknowledged request
/// is older than `unresponsive_after` at a check, and back to `Responsive` as
/// soon as no overdue request remains.
pub(crate) struct ResponsiveTracker {
    unacknowledged: Mutex<FxHashMap<u32, Instant>>,
    latency: Mutex<LatencyStats>,
    state: watch::Sender<ResponsiveState>,
    unresponsive_after: Duration,
}

impl ResponsiveTracker {
    pub(crate) fn new(unresponsive_after: Duration) -> Self {
        let (state, _) = watch::channel(ResponsiveState::Responsive);
        Self {
            unacknowledged: Mutex::new(FxHashMap::default()),
            latency: Mutex::new(LatencyStats::default()),
            state,
            unresponsive_after,
        }
    }

    pub(crate) fn request_sent(&self, req: u32) {
        self.unacknowledged.lock().insert(req, Instant::now());
    }

    pub(crate) fn acknowledged(&self, req: u32) {
        let overdue = {
            let mut unacknowledged = self.unacknowledged.lock();
            if unacknowledged.remove(&req).is_none() {
                return;
            }
            self.has_overdue(&unacknowledged)
        };
        if !overdue {
            self.set(ResponsiveState::Responsive);
        }
    }

    pub(crate) fn record_latency(&self, duration: Duration) {
        self.latency.lock().record(duration);
    }

    pub(crate) fn latency(&self) -> LatencyStats {
        *self.latency.lock()
    }

    pub(crate) fn check(&self) {
        let overdue = self.has_overdue(&self.unacknowledged.lock());
        if overdue {
            self.set(ResponsiveState::Unresponsive);
        }
    }

    pub(crate) fn clear(&self) {
        self.unacknowledged.lock().clear();
        self.set(ResponsiveState::Responsive);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ResponsiveState> {
        self.state.subscribe()
    }

    pub(crate) fn current(&self) -> ResponsiveState {
        *self.state.borrow()
    }

    fn has_overdue(&self, unacknowledged: &FxHashMap<u32, Instant>) -> bool {
        unacknowledged
            .values()
            .min()
            .is_some_and(|oldest| oldest.elapsed() >= self.unresponsive_after)
    }

    fn set(&self, next: ResponsiveState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_stats_track_min_max_avg() {
        let mut stats = LatencyStats::default();
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(30));
        assert_eq!(stats.samples(), 2);
        assert!((stats.min_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_ms - 30.0).abs() < 1e-9);
        assert!((stats.avg_ms - 20.0).abs() < 1e-9);
        assert!((stats.last_ms - 30.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn flips_when_acknowledgement_is_overdue() {
        let tracker = ResponsiveTracker::new(Duration::from_secs(3));
        let mut state = tracker.subscribe();
        tracker.request_sent(1);
        tracker.check();
        assert_eq!(tracker.current(), ResponsiveState::Responsive);

        tokio::time::advance(Duration::from_secs(4)).await;
        tracker.check();
        assert!(state.has_changed().unwrap());
        assert_eq!(*state.borrow_and_update(), ResponsiveState::Unresponsive);

        tracker.acknowledged(1);
        assert_eq!(*state.borrow_and_update(), ResponsiveState::Responsive);
    }
}
