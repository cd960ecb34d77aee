//! Bounded admission control.
//!
//! Callers wait on a tokio semaphore rather than polling. A slot is held by a
//! [`GatePermit`] and handed back when the permit drops, so it is released
//! exactly once on every exit path: success, error, panic, or the caller's
//! future being dropped mid-flight.

use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::RuntimeError;

/// Limits simultaneous in-flight calls to one upstream.
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl fmt::Debug for ConcurrencyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyGate")
            .field("max_concurrent", &self.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    /// Create a gate admitting at most `max_concurrent` calls.
    pub fn new(max_concurrent: usize) -> Result<Self, RuntimeError> {
        if max_concurrent == 0 {
            return Err(RuntimeError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if max_concurrent > Semaphore::MAX_PERMITS {
            return Err(RuntimeError::InvalidConfig(format!(
                "max_concurrent must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Wait until a slot is free and take it.
    pub async fn acquire(&self) -> GatePermit {
        match Arc::clone(&self.semaphore).acquire_owned().await {
            Ok(permit) => GatePermit { _permit: permit },
            // The semaphore is owned here and never closed.
            Err(_) => unreachable!("concurrency gate semaphore closed"),
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(GatePermit { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available())
    }
}
