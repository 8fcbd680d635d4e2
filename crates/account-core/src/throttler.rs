//! `RequestThrottler`: per-key exponential backoff using a monotonic clock
//!, grounded on `examples/original_source/common/oauth2/network/
//! request_throttler.{h,cc}` (a thin wrapper around Chromium's
//! `net::BackoffEntry`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::traits::TickClock;

/// Backoff policy: initial delay 1s, multiplier 2, max 5 minutes, always
/// applying the initial delay unless the last attempt was an error.
/// Fuzzing is disabled in tests and 33% in production, mirroring the
/// original's policy table.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub fuzz_factor: f64,
}

impl BackoffPolicy {
    #[must_use]
    pub fn production() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5 * 60),
            fuzz_factor: 0.33,
        }
    }

    #[must_use]
    pub fn deterministic_for_tests() -> Self {
        Self {
            fuzz_factor: 0.0,
            ..Self::production()
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::production()
    }
}

/// One key's backoff state: failure count and the instant at which the
/// current backoff window releases.
#[derive(Debug, Clone)]
struct BackoffEntry {
    failure_count: u32,
    release_time: Instant,
}

impl BackoffEntry {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0,
            release_time: now,
        }
    }

    fn time_until_release(&self, now: Instant) -> Duration {
        self.release_time.saturating_duration_since(now)
    }

    fn should_reject(&self, now: Instant) -> bool {
        self.release_time > now
    }

    fn reset(&mut self, now: Instant) {
        self.failure_count = 0;
        self.release_time = now;
    }

    /// Grow the backoff window for the next caller. Always called on
    /// failure, growing the backoff for the next caller.
    fn inform_of_request(&mut self, now: Instant, policy: &BackoffPolicy) {
        self.failure_count += 1;
        let base_delay_secs =
            policy.initial_delay.as_secs_f64() * policy.multiplier.powi(self.failure_count as i32 - 1);
        let mut delay_secs = base_delay_secs.min(policy.max_delay.as_secs_f64());
        if policy.fuzz_factor > 0.0 {
            let floor = delay_secs * (1.0 - policy.fuzz_factor);
            delay_secs = rand::thread_rng().gen_range(floor..=delay_secs);
        }
        self.release_time = now + Duration::from_secs_f64(delay_secs);
    }
}

/// Per-key exponential backoff tracker.
#[derive(Debug)]
pub struct RequestThrottler {
    clock: Arc<dyn TickClock>,
    policy: BackoffPolicy,
    entries: RwLock<HashMap<String, BackoffEntry>>,
}

impl RequestThrottler {
    #[must_use]
    pub fn new(clock: Arc<dyn TickClock>, policy: BackoffPolicy) -> Self {
        Self {
            clock,
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the current request delay for `request_key` and grows the
    /// backoff window for the next call with the same key.
    ///
    /// If no entry exists yet, one is created. If the entry is not
    /// currently throttling, the delay returned is zero and the entry is
    /// reset first; otherwise the delay is however much time remains until
    /// release.
    pub fn get_and_update(&self, request_key: &str) -> Duration {
        let now = self.clock.now();
        let mut entries = self.entries.write().expect("throttler lock poisoned");
        let entry = entries
            .entry(request_key.to_string())
            .or_insert_with(|| BackoffEntry::new(now));

        let delay = if entry.should_reject(now) {
            entry.time_until_release(now)
        } else {
            entry.reset(now);
            Duration::ZERO
        };

        entry.inform_of_request(now, &self.policy);
        delay
    }

    /// Drop all throttling state, e.g. as a step of ending a session.
    pub fn reset_all(&self) {
        self.entries.write().expect("throttler lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeClock;

    #[test]
    fn first_call_is_not_throttled() {
        let clock = FakeClock::new();
        let throttler = RequestThrottler::new(clock, BackoffPolicy::deterministic_for_tests());
        assert_eq!(throttler.get_and_update("k"), Duration::ZERO);
    }

    #[test]
    fn consecutive_calls_within_window_grow_monotonically() {
        let clock = FakeClock::new();
        let throttler = RequestThrottler::new(clock.clone(), BackoffPolicy::deterministic_for_tests());

        let d0 = throttler.get_and_update("k");
        assert_eq!(d0, Duration::ZERO);
        let d1 = throttler.get_and_update("k");
        let d2 = throttler.get_and_update("k");
        assert!(d1 <= d2, "delays should be nondecreasing: {d1:?} vs {d2:?}");
        assert!(d1 > Duration::ZERO);

        // Fast-forward past the current release time: throttling lifts.
        clock.advance(Duration::from_secs(5 * 60 + 1));
        assert_eq!(throttler.get_and_update("k"), Duration::ZERO);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let clock = FakeClock::new();
        let throttler = RequestThrottler::new(clock.clone(), BackoffPolicy::deterministic_for_tests());
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = throttler.get_and_update("k");
            clock.advance(Duration::from_millis(1));
        }
        assert!(last <= Duration::from_secs(5 * 60));
    }

    #[test]
    fn keys_are_independent() {
        let clock = FakeClock::new();
        let throttler = RequestThrottler::new(clock, BackoffPolicy::deterministic_for_tests());
        throttler.get_and_update("a");
        assert_eq!(throttler.get_and_update("b"), Duration::ZERO);
    }

    #[test]
    fn reset_all_clears_state() {
        let clock = FakeClock::new();
        let throttler = RequestThrottler::new(clock, BackoffPolicy::deterministic_for_tests());
        throttler.get_and_update("k");
        throttler.reset_all();
        assert_eq!(throttler.get_and_update("k"), Duration::ZERO);
    }
}
