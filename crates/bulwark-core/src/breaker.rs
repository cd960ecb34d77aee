//! Circuit breaker to stop calling an upstream that keeps failing.
//!
//! Failures are counted in a sliding window: only failures within
//! `monitoring_period` of now count toward `failure_threshold`, so a burst of
//! old failures does not keep the breaker biased once traffic recovers.
//!
//! # State Transitions
//! ```text
//! Closed    → Open:      failures in window >= threshold
//! Open      → HalfOpen:  reset_timeout elapsed since the last failure
//! HalfOpen  → Closed:    a probe succeeds
//! HalfOpen  → Open:      a probe fails
//! ```
//!
//! Every call made while half-open is admitted as a probe. The number of
//! simultaneous probes is bounded by the caller's concurrency gate, and the
//! first failed probe re-opens the breaker.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window before opening
    pub failure_threshold: u32,

    /// Time after the last failure before a probe is admitted
    #[serde(with = "crate::duration")]
    pub reset_timeout: Duration,

    /// Length of the sliding failure window
    #[serde(with = "crate::duration")]
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            monitoring_period: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.reset_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.monitoring_period.is_zero() {
            return Err(ConfigError::Invalid {
                field: "circuit_breaker.monitoring_period",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// State of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    Closed,

    /// Upstream assumed down, calls fail fast
    Open,

    /// Probes admitted to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: usize,
    pub times_opened: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: VecDeque<Instant>,
    last_failure: Option<Instant>,
    times_opened: u64,
}

impl Inner {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-upstream circuit breaker.
///
/// Every method is a short critical section, so the breaker can be shared
/// between tasks on a multi-threaded runtime. None of them fail.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a breaker on the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Create a breaker reading time from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                last_failure: None,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may proceed.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open
    /// here and admits the call as a probe.
    pub fn can_request(&self) -> bool {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at) >= self.config.reset_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(
                        upstream = %self.name,
                        "Circuit transitioning to half-open for recovery probe"
                    );
                }
                cooled_down
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            tracing::info!(upstream = %self.name, "Circuit closed after successful probe");
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        inner.last_failure = Some(now);
        inner.prune(now, self.config.monitoring_period);
        inner.failures.push_back(now);

        let count = inner.failures.len();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.times_opened += 1;
                tracing::warn!(
                    upstream = %self.name,
                    failures = count,
                    "Circuit reopened after failed probe"
                );
            }
            CircuitState::Closed if count >= self.config.failure_threshold as usize => {
                inner.state = CircuitState::Open;
                inner.times_opened += 1;
                tracing::warn!(
                    upstream = %self.name,
                    failures = count,
                    threshold = self.config.failure_threshold,
                    "Circuit opened after repeated failures"
                );
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failures currently inside the monitoring window.
    pub fn failure_count(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.prune(now, self.config.monitoring_period);
        inner.failures.len()
    }

    /// Number of transitions into the open state.
    pub fn times_opened(&self) -> u64 {
        self.inner.lock().times_opened
    }

    /// Force the breaker closed and forget all failures.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures.clear();
        inner.last_failure = None;
        tracing::info!(upstream = %self.name, "Circuit reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let failure_count = self.failure_count();
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            failure_count,
            times_opened: inner.times_opened,
        }
    }
}
