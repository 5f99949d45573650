//! Adaptive pacing for the single scrape stream.
//!
//! The limiter is deliberately not thread-safe on its own: it is owned by
//! the queue's critical section and only the processing loop mutates it.

use std::time::{Duration, Instant};

pub const INITIAL_DELAY_MS: u64 = 2_067;
pub const MIN_DELAY_MS: u64 = 274;
pub const MAX_DELAY_MS: u64 = 180_000;
pub const BACKOFF_MULTIPLIER: f64 = 1.4;
pub const SUCCESSES_BEFORE_RECOVERY: u32 = 3;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            multiplier: BACKOFF_MULTIPLIER,
        }
    }
}

#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    config: RateLimiterConfig,
    current_delay: Duration,
    consecutive_successes: u32,
    rate_limited: bool,
    last_request: Option<Instant>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let current_delay = config
            .initial_delay
            .clamp(config.min_delay, config.max_delay);
        Self {
            config,
            current_delay,
            consecutive_successes: 0,
            rate_limited: false,
            last_request: None,
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    /// How much longer the stream must wait before the next dispatch, if
    /// anything. `None` means the stream may dispatch now.
    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request?;
        let elapsed = now.duration_since(last);
        if elapsed >= self.current_delay {
            None
        } else {
            Some(self.current_delay - elapsed)
        }
    }

    /// Stamp the dispatch of an item. Spacing is measured from this moment,
    /// not from when the scrape finishes.
    pub fn mark_dispatched(&mut self, now: Instant) {
        self.last_request = Some(now);
    }

    /// Record one successful scrape. Every third consecutive success
    /// shortens the delay (bounded below) and clears the limited flag.
    /// Returns true when a recovery step was applied.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_successes += 1;
        if self.consecutive_successes < SUCCESSES_BEFORE_RECOVERY {
            return false;
        }

        self.consecutive_successes = 0;
        self.rate_limited = false;
        let reduced = (self.current_delay.as_millis() as f64 / self.config.multiplier).floor();
        self.current_delay = Duration::from_millis(reduced as u64).max(self.config.min_delay);
        true
    }

    /// Record a rate-limit signal: multiply the delay (bounded above), set
    /// the limited flag, and reset the success streak.
    pub fn record_rate_limited(&mut self) {
        self.rate_limited = true;
        self.consecutive_successes = 0;
        let increased = (self.current_delay.as_millis() as f64 * self.config.multiplier).ceil();
        self.current_delay = Duration::from_millis(increased as u64).min(self.config.max_delay);
    }

    /// Any non-rate-limit failure just breaks the success streak.
    pub fn record_failure(&mut self) {
        self.consecutive_successes = 0;
    }
}

impl Default for AdaptiveRateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_delay() {
        let limiter = AdaptiveRateLimiter::default();
        assert_eq!(limiter.current_delay(), Duration::from_millis(INITIAL_DELAY_MS));
        assert!(!limiter.is_rate_limited());
    }

    #[test]
    fn three_successes_reduce_delay() {
        let mut limiter = AdaptiveRateLimiter::default();
        assert!(!limiter.record_success());
        assert!(!limiter.record_success());
        assert!(limiter.record_success());

        let expected = (INITIAL_DELAY_MS as f64 / BACKOFF_MULTIPLIER).floor() as u64;
        assert_eq!(limiter.current_delay(), Duration::from_millis(expected));
        assert_eq!(limiter.consecutive_successes(), 0);
    }

    #[test]
    fn rate_limit_backs_off_and_sets_flag() {
        let mut limiter = AdaptiveRateLimiter::default();
        limiter.record_success();
        limiter.record_rate_limited();

        assert!(limiter.is_rate_limited());
        assert_eq!(limiter.consecutive_successes(), 0);
        let expected = (INITIAL_DELAY_MS as f64 * BACKOFF_MULTIPLIER).ceil() as u64;
        assert_eq!(limiter.current_delay(), Duration::from_millis(expected));
    }

    #[test]
    fn recovery_clears_rate_limited_flag() {
        let mut limiter = AdaptiveRateLimiter::default();
        limiter.record_rate_limited();
        for _ in 0..SUCCESSES_BEFORE_RECOVERY {
            limiter.record_success();
        }
        assert!(!limiter.is_rate_limited());
    }

    #[test]
    fn delay_stays_within_bounds() {
        let mut limiter = AdaptiveRateLimiter::default();
        for _ in 0..64 {
            limiter.record_rate_limited();
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(MAX_DELAY_MS));

        for _ in 0..256 {
            limiter.record_success();
        }
        assert_eq!(limiter.current_delay(), Duration::from_millis(MIN_DELAY_MS));
    }

    #[test]
    fn pacing_measured_from_dispatch() {
        let mut limiter = AdaptiveRateLimiter::default();
        let start = Instant::now();
        assert!(limiter.time_until_ready(start).is_none());

        limiter.mark_dispatched(start);
        let remaining = limiter
            .time_until_ready(start + Duration::from_millis(100))
            .expect("should still be pacing");
        assert_eq!(remaining, Duration::from_millis(INITIAL_DELAY_MS - 100));

        assert!(limiter
            .time_until_ready(start + limiter.current_delay())
            .is_none());
    }

    #[test]
    fn failure_resets_streak_without_touching_delay() {
        let mut limiter = AdaptiveRateLimiter::default();
        limiter.record_success();
        limiter.record_success();
        limiter.record_failure();
        assert_eq!(limiter.consecutive_successes(), 0);
        assert_eq!(limiter.current_delay(), Duration::from_millis(INITIAL_DELAY_MS));
    }
}
