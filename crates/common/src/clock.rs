//! Clock and timing utilities for capture and compositing.
//!
//! Every component that measures time takes a [`Clock`] so tests can drive
//! it deterministically with a [`ManualClock`]. This module provides:
//! - A monotonic clock anchored at creation
//! - Active-time accounting that excludes paused intervals
//! - A rate controller for fixed-frame-rate sampling

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source reporting nanoseconds since an arbitrary epoch.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Clock backed by [`Instant`], anchored to the moment it was created.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for tests and offline rendering.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.now_ns.store(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

/// Accumulates running time across pause/resume cycles.
///
/// The reported value is the sum of all completed segments plus the
/// currently running one. Pausing freezes the value; resuming continues
/// from it instead of resetting.
#[derive(Debug, Clone, Default)]
pub struct ActiveTimer {
    accumulated_ns: u64,
    segment_start_ns: Option<u64>,
}

impl ActiveTimer {
    /// Reset to zero and start running.
    pub fn start(&mut self, now_ns: u64) {
        self.accumulated_ns = 0;
        self.segment_start_ns = Some(now_ns);
    }

    /// Freeze the running segment. No-op when already paused.
    pub fn pause(&mut self, now_ns: u64) {
        if let Some(start) = self.segment_start_ns.take() {
            self.accumulated_ns += now_ns.saturating_sub(start);
        }
    }

    /// Start a new segment. No-op when already running.
    pub fn resume(&mut self, now_ns: u64) {
        if self.segment_start_ns.is_none() {
            self.segment_start_ns = Some(now_ns);
        }
    }

    pub fn is_running(&self) -> bool {
        self.segment_start_ns.is_some()
    }

    pub fn elapsed(&self, now_ns: u64) -> Duration {
        let running = self
            .segment_start_ns
            .map(|start| now_ns.saturating_sub(start))
            .unwrap_or(0);
        Duration::from_nanos(self.accumulated_ns + running)
    }
}

/// Frame rate controller for fixed-rate sampling.
#[derive(Debug)]
pub struct RateController {
    target_interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl RateController {
    /// Create a controller targeting the given Hz rate.
    pub fn new(target_hz: u32) -> Self {
        Self {
            target_interval_ns: 1_000_000_000 / target_hz.max(1) as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.target_interval_ns => {
                // Stay on the fixed grid so a late refresh does not drift the rate.
                let missed = (current_ns - last) / self.target_interval_ns;
                self.last_tick_ns = Some(last + missed * self.target_interval_ns);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MS: u64 = 1_000_000;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        clock.advance(Duration::from_millis(250));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_ns(), 500 * MS);
        clock.set(Duration::from_secs(2));
        assert_eq!(clock.now_ns(), 2_000 * MS);
    }

    #[test]
    fn test_active_timer_excludes_paused_interval() {
        let mut timer = ActiveTimer::default();
        timer.start(0);
        timer.pause(2_000 * MS);
        assert_eq!(timer.elapsed(5_000 * MS), Duration::from_millis(2_000));
        timer.resume(5_000 * MS);
        assert_eq!(timer.elapsed(6_000 * MS), Duration::from_millis(3_000));
    }

    #[test]
    fn test_active_timer_restart_resets() {
        let mut timer = ActiveTimer::default();
        timer.start(0);
        timer.pause(700 * MS);
        timer.start(1_000 * MS);
        assert_eq!(timer.elapsed(1_100 * MS), Duration::from_millis(100));
    }

    #[test]
    fn test_rate_controller() {
        let mut ctrl = RateController::new(60);
        assert!(ctrl.should_tick(0)); // first tick always fires
        assert!(!ctrl.should_tick(1_000_000)); // 1ms later, too soon
        assert!(ctrl.should_tick(17_000_000)); // ~17ms later, should fire (60Hz ~ 16.67ms)
    }

    #[test]
    fn test_rate_controller_caps_rate_below_refresh() {
        // 60Hz refresh sampled by a 30fps capture keeps every other frame.
        let mut ctrl = RateController::new(30);
        let fired = (0..60u64)
            .filter(|i| ctrl.should_tick(i * 1_000_000_000 / 60))
            .count();
        assert_eq!(fired, 30);
    }

    proptest! {
        #[test]
        fn pause_then_immediate_resume_is_neutral(
            run_ms in 0u64..10_000,
            after_ms in 0u64..10_000,
        ) {
            let mut paused = ActiveTimer::default();
            let mut straight = ActiveTimer::default();
            paused.start(0);
            straight.start(0);

            paused.pause(run_ms * MS);
            paused.resume(run_ms * MS);

            let now = (run_ms + after_ms) * MS;
            prop_assert_eq!(paused.elapsed(now), straight.elapsed(now));
        }
    }
}
