//! Retry configuration shared by transports.

use std::time::Duration;

/// Retry policy for a bounded, internally retried operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Delay between attempts
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: BackoffStrategy::Linear {
                base: Duration::from_secs(1),
                max: Duration::from_secs(10),
            },
        }
    }
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt.saturating_sub(1))
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),

    /// Exponential backoff (base * 2^retry_count, capped at max)
    Exponential { base: Duration, max: Duration },

    /// Linear backoff (base * (retry_count + 1), capped at max)
    Linear { base: Duration, max: Duration },
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry count.
    pub fn delay(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(d) => *d,
            BackoffStrategy::Exponential { base, max } => {
                let delay = base.saturating_mul(2u32.saturating_pow(retry_count));
                delay.min(*max)
            }
            BackoffStrategy::Linear { base, max } => {
                let delay = base.saturating_mul(retry_count.saturating_add(1));
                delay.min(*max)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_waits_attempt_seconds() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(4), Duration::from_secs(4));
        assert_eq!(policy.delay_after(10), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(5), Duration::from_secs(30)); // Capped
    }

    #[test]
    fn test_backoff_linear_capped() {
        let backoff = BackoffStrategy::Linear {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60),
        };

        assert_eq!(backoff.delay(0), Duration::from_secs(5));
        assert_eq!(backoff.delay(2), Duration::from_secs(15));
        assert_eq!(backoff.delay(20), Duration::from_secs(60));
    }
}
