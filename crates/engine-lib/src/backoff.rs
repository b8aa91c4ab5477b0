//! Exponential reconnect backoff for long-lived watch streams

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(5),
        }
    }
}

/// Doubles the delay on every consecutive failure up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            current: config.initial.min(config.max),
            config,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempts += 1;
        self.current = std::cmp::min(self.current * 2, self.config.max);
        delay
    }

    /// Back to the initial delay after a successful attempt
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.config.initial.min(self.config.max);
    }

    /// Consecutive failures since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(1),
        });

        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = Backoff::new(BackoffConfig::default());
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_initial_above_max_is_capped() {
        let mut backoff = Backoff::new(BackoffConfig {
            initial: Duration::from_secs(10),
            max: Duration::from_secs(2),
        });
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
    }
}
