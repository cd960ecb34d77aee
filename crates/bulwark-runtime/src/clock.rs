//! Breaker clock driven by tokio's timer.
//!
//! Under `tokio::time::pause()` this clock advances with the runtime, so
//! breaker reset timeouts and backoff sleeps share one timeline in tests.

use bulwark_core::Clock;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}
