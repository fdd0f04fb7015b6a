//! Reconnection Policy
//!
//! Exponential backoff for the registry WebSocket. Delays start at one
//! second, grow by 1.5x per failed attempt and are capped at 60 seconds.
//! Jitter is off by default so the sequence is exact.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 1.5,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }
}

/// Exponential backoff state.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy from `config`.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay to wait before the next attempt, advancing the backoff.
    ///
    /// Returns `None` once `max_attempts` is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);

        let next = Duration::try_from_secs_f64(
            self.current_delay.as_secs_f64() * self.config.multiplier,
        )
        .unwrap_or(self.config.max_delay);
        self.current_delay = next.min(self.config.max_delay);

        Some(delay)
    }

    /// Reset after a successful connection.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        let base = duration.as_secs_f64();
        let range = base * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::from_secs_f64((base + jitter).max(0.001))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sequence_grows_by_half() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let delays: Vec<Duration> = (0..5).map(|_| policy.next_delay().unwrap()).collect();

        assert_eq!(
            delays,
            [
                Duration::from_millis(1000),
                Duration::from_millis(1500),
                Duration::from_millis(2250),
                Duration::from_micros(3_375_000),
                Duration::from_nanos(5_062_500_000),
            ]
        );
    }

    #[test]
    fn delay_is_capped_at_sixty_seconds() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());

        let last = (0..20).map(|_| policy.next_delay().unwrap()).last().unwrap();
        assert_eq!(last, Duration::from_secs(60));
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn reset_returns_to_one_second() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for _ in 0..6 {
            let _ = policy.next_delay();
        }
        assert_eq!(policy.attempt_count(), 6);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn max_attempts_stops_retrying() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
    }

    #[test]
    fn jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }
}
