//! Retry decisions and exponential backoff with jitter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ConfigError, ErrorKind, NormalizedError};

/// Backoff schedule configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    #[serde(with = "crate::duration")]
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "crate::duration")]
    pub max_delay: Duration,

    /// Add 0-10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid {
                field: "backoff.base_delay",
                reason: format!(
                    "base delay {:?} exceeds max delay {:?}",
                    self.base_delay, self.max_delay
                ),
            });
        }
        Ok(())
    }
}

/// Decides whether and when a failed attempt is retried.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// `attempt` is zero-based: the first attempt is 0.
    pub fn should_retry(&self, error: &NormalizedError, attempt: u32, max_retries: u32) -> bool {
        if attempt >= max_retries {
            return false;
        }

        match error.kind() {
            ErrorKind::TransportFailure => true,
            ErrorKind::CircuitOpen => false,
            _ => matches!(error.http_status(), Some(status) if status >= 500 || status == 429),
        }
    }

    /// Delay after failed attempt `attempt`: `base * 2^attempt` plus up to
    /// 10% jitter, never more than `max_delay`.
    ///
    /// Once the exponential term reaches the cap the jitter is subtracted
    /// instead, so capped delays still spread over `[0.9 * max, max]`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base_ms = duration_millis(self.backoff.base_delay);
        let max_ms = duration_millis(self.backoff.max_delay);

        let exponential = 2u64.saturating_pow(attempt);
        let delay_ms = base_ms.saturating_mul(exponential).min(max_ms);

        let jitter_range = delay_ms / 10;
        if !self.backoff.jitter || jitter_range == 0 {
            return Duration::from_millis(delay_ms);
        }

        let jitter = rand::thread_rng().gen_range(0..jitter_range);
        let jittered = if delay_ms.saturating_add(jitter_range) > max_ms {
            delay_ms - jitter
        } else {
            delay_ms + jitter
        };
        Duration::from_millis(jittered)
    }

    /// Delay honouring a server `Retry-After` hint carried by `error`.
    pub fn delay_for(&self, error: &NormalizedError, attempt: u32) -> Duration {
        let backoff = self.next_delay(attempt);
        match error.retry_after() {
            Some(hint) => backoff.max(hint).min(self.backoff.max_delay),
            None => backoff,
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorNormalizer, TransportError};
    use crate::request::Headers;
    use proptest::prelude::*;

    fn error_for(status: u16) -> NormalizedError {
        ErrorNormalizer::new("test").classify(&TransportError::status(status))
    }

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            jitter: false,
        })
    }

    #[test]
    fn test_retryable_kinds() {
        let policy = RetryPolicy::default();
        let timeout = ErrorNormalizer::new("test")
            .classify(&TransportError::timeout(Duration::from_secs(1)));

        assert!(policy.should_retry(&timeout, 0, 3));
        assert!(policy.should_retry(&error_for(500), 0, 3));
        assert!(policy.should_retry(&error_for(503), 1, 3));
        assert!(policy.should_retry(&error_for(429), 2, 3));
    }

    #[test]
    fn test_non_retryable_kinds() {
        let policy = RetryPolicy::default();
        for status in [400, 401, 403, 404, 409] {
            assert!(!policy.should_retry(&error_for(status), 0, 10), "{status}");
        }
        let open = ErrorNormalizer::new("test").circuit_open();
        assert!(!policy.should_retry(&open, 0, 10));
    }

    #[test]
    fn test_budget_exhausted() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&error_for(500), 1, 2));
        assert!(!policy.should_retry(&error_for(500), 2, 2));
        assert!(!policy.should_retry(&error_for(500), 0, 0));
    }

    #[test]
    fn test_exponential_growth() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(0), Duration::from_millis(100));
        assert_eq!(policy.next_delay(1), Duration::from_millis(200));
        assert_eq!(policy.next_delay(2), Duration::from_millis(400));
        assert_eq!(policy.next_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped() {
        let policy = no_jitter();
        assert_eq!(policy.next_delay(10), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::new(BackoffConfig {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            jitter: true,
        });
        for _ in 0..50 {
            let delay = policy.next_delay(0);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay < Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_capped_delays_keep_jitter() {
        let policy = RetryPolicy::new(BackoffConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(2),
            jitter: true,
        });

        let samples: std::collections::BTreeSet<Duration> =
            (0..200).map(|_| policy.next_delay(5)).collect();

        assert!(samples.len() > 1, "capped delays collapsed to {:?}", samples);
        for delay in &samples {
            assert!(*delay > Duration::from_millis(1800));
            assert!(*delay <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_retry_after_extends_delay() {
        let policy = RetryPolicy::new(BackoffConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        });
        let mut headers = Headers::new();
        headers.insert("retry-after", "3");
        let err = ErrorNormalizer::new("test").classify(&TransportError::Status {
            status: 429,
            headers,
            body: Vec::new(),
        });

        assert_eq!(policy.delay_for(&err, 0), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_after_still_capped() {
        let policy = no_jitter();
        let mut headers = Headers::new();
        headers.insert("retry-after", "3600");
        let err = ErrorNormalizer::new("test").classify(&TransportError::Status {
            status: 503,
            headers,
            body: Vec::new(),
        });

        assert_eq!(policy.delay_for(&err, 0), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_validation() {
        let bad = BackoffConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            jitter: true,
        };
        assert!(bad.validate().is_err());
        assert!(BackoffConfig::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(attempt in 0u32..200, base in 1u64..5_000, cap in 1u64..60_000) {
            let policy = RetryPolicy::new(BackoffConfig {
                base_delay: Duration::from_millis(base),
                max_delay: Duration::from_millis(cap),
                jitter: true,
            });
            let delay = policy.next_delay(attempt);
            prop_assert!(delay <= Duration::from_millis(cap));
            let floor = base.saturating_mul(2u64.saturating_pow(attempt)).min(cap);
            prop_assert!(delay.as_millis() as u64 >= floor - floor / 10);
        }

        #[test]
        fn prop_only_retryable_statuses_retry(status in 400u16..600, attempt in 0u32..5) {
            let policy = RetryPolicy::default();
            let err = error_for(status);
            let expected = status >= 500 || status == 429;
            prop_assert_eq!(policy.should_retry(&err, attempt, 5), expected);
            prop_assert_eq!(err.is_retryable(), expected);
        }
    }
}
