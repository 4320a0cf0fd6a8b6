//! Retry policy with capped exponential backoff and downward jitter.

use std::time::Duration;

/// Fraction of the computed delay that jitter may remove.
pub const JITTER_RATIO: f64 = 0.25;

/// Retry parameters for one logical request. Immutable for the duration of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never below 1.
    pub attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any computed backoff.
    pub max_delay: Duration,
    /// Deadline of a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(4_000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration, max_delay: Duration, timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay,
            timeout,
        }
    }

    /// Policy that makes a single attempt.
    pub fn no_retry(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            ..Self::default()
        }
    }

    /// `min(max_delay, base_delay * 2^(attempt - 1))` for a 1-based `attempt`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff after the failed 1-based `attempt`, with jitter applied.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        apply_jitter(self.backoff_ceiling(attempt), fastrand::f64())
    }

    /// Per-attempt timeout in whole milliseconds.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Subtract up to [`JITTER_RATIO`] of `delay`, scaled by `sample` in `[0, 1)`.
///
/// The result is never larger than `delay`.
pub fn apply_jitter(delay: Duration, sample: f64) -> Duration {
    let sample = if sample.is_finite() {
        sample.clamp(0.0, 1.0)
    } else {
        0.0
    };
    delay.saturating_sub(delay.mul_f64(JITTER_RATIO * sample))
}

/// Parse a `Retry-After` header given in seconds.
///
/// Only finite positive values are honored; HTTP dates and non-positive values yield
/// `None` so the caller falls back to the computed backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            5,
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn ceiling_doubles_until_capped() {
        let policy = policy();

        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_ceiling(5), Duration::from_secs(1));
        assert_eq!(policy.backoff_ceiling(64), Duration::from_secs(1));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = policy();

        for _ in 0..200 {
            for attempt in 1..=6 {
                let ceiling = policy.backoff_ceiling(attempt);
                let delay = policy.backoff_delay(attempt);

                assert!(delay <= ceiling, "attempt={attempt}, delay={delay:?}");
                assert!(delay <= policy.max_delay);
                assert!(delay >= ceiling.mul_f64(1.0 - JITTER_RATIO) - Duration::from_nanos(1));
            }
        }
    }

    #[test]
    fn jitter_only_shortens() {
        let delay = Duration::from_millis(800);

        assert_eq!(apply_jitter(delay, 0.0), delay);
        assert_eq!(apply_jitter(delay, 1.0), Duration::from_millis(600));
        assert_eq!(apply_jitter(delay, 5.0), Duration::from_millis(600));
        assert_eq!(apply_jitter(delay, f64::NAN), delay);
        assert_eq!(apply_jitter(Duration::ZERO, 0.5), Duration::ZERO);
    }

    #[test]
    fn retry_after_accepts_positive_seconds_only() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1_500)));
        assert_eq!(parse_retry_after("0"), None);
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("inf"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }

    #[test]
    fn attempts_never_drop_below_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.attempts, 1);
        assert_eq!(RetryPolicy::no_retry(Duration::from_secs(1)).attempts, 1);
    }
}
