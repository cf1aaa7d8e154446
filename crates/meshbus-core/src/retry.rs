//! Exponential backoff policy for poller restarts and batch retries.
//!
//! The dispatcher core never retries dependency failures itself; the poller
//! owns retry of failed polls and failed batch deliveries, using this policy.

use std::time::Duration;

/// Exponential backoff with a delay cap.
///
/// Attempt numbering starts at 1: `delay(1)` returns `initial_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First retry delay.
    pub initial_delay: Duration,
    /// Upper bound on any retry delay.
    pub max_delay: Duration,
    /// Multiplier applied per attempt.
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before the given retry attempt (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis = self.initial_delay.as_millis() as f64 * self.factor.powi(attempt as i32 - 1);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 2.0,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            factor: 10.0,
        };
        assert_eq!(policy.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempt_behaves_like_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), policy.delay(1));
    }
}
