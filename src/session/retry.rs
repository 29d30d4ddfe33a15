//! Retry with exponential backoff for opening live sessions
//!
//! Only the initial connect is retried. Once audio has flowed a failure
//! ends the turn.

use std::time::{Duration, SystemTime};

use crate::Error;

/// Retry policy for session connects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }
}

/// Whether a connect failure is worth another attempt
///
/// Transport-level failures are; bad configuration and malformed requests
/// are not.
#[must_use]
pub const fn is_retryable(error: &Error) -> bool {
    matches!(error, Error::Connect(_) | Error::Io(_) | Error::WebSocket(_))
}

/// Compute the delay before the next connect attempt
///
/// `min(base_delay * 2^attempt + jitter, max_delay)` with 0-25% jitter taken
/// from the subsecond part of the system clock.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    let base = base.min(policy.max_delay);

    let jitter_nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    let jitter_fraction = f64::from(jitter_nanos % 250) / 1000.0;
    let jitter = base.mul_f64(jitter_fraction);

    (base + jitter).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_does_not_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy, RetryPolicy::none());
    }

    #[test]
    fn retryable_errors() {
        assert!(is_retryable(&Error::Connect("refused".to_string())));
        assert!(!is_retryable(&Error::Config("no key".to_string())));
        assert!(!is_retryable(&Error::Remote("quota".to_string())));
    }

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        };

        assert!(delay_for_attempt(&policy, 0) >= Duration::from_millis(100));
        assert!(delay_for_attempt(&policy, 1) >= Duration::from_millis(200));
        assert!(delay_for_attempt(&policy, 2) >= Duration::from_millis(400));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(5),
        };
        for attempt in 0..5 {
            assert!(delay_for_attempt(&policy, attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
        };
        for _ in 0..50 {
            let d = delay_for_attempt(&policy, 0);
            assert!(d >= Duration::from_millis(1000), "below base: {d:?}");
            assert!(d <= Duration::from_millis(1250), "above 125%: {d:?}");
        }
    }
}
