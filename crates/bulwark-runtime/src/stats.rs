//! Per-upstream call statistics.
//!
//! Counters are plain atomics bumped on the hot path; [`UpstreamSnapshot`]
//! combines them with breaker and gate state for operators.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use bulwark_core::CircuitState;

/// Counters for one upstream.
#[derive(Debug, Default)]
pub struct ClientStats {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    rejected: AtomicU64,
}

impl ClientStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    /// Calls that ended in an error after any retries, excluding rejections.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Backoff sleeps taken across all calls.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Calls refused because the circuit was open.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Operator view of one upstream.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamSnapshot {
    pub upstream: String,
    pub circuit_state: CircuitState,
    pub failures_in_window: usize,
    pub times_opened: u64,
    pub in_flight: usize,
    pub max_concurrent: usize,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub rejected: u64,
    pub captured_at: DateTime<Utc>,
}
