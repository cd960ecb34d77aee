//! # bulwark-core
//!
//! Deterministic building blocks for calling upstream HTTP services that
//! may be slow or down.
//!
//! This crate performs no I/O. It holds the state machines and decision
//! tables that the async client in `bulwark-runtime` composes:
//!
//! - [`CircuitBreaker`]: should this upstream be called at all?
//! - [`OperationPolicyTable`]: how long may an attempt take, how often is it retried?
//! - [`RetryPolicy`]: is this failure worth another attempt, and after what delay?
//! - [`ErrorNormalizer`]: which stable [`ErrorKind`] does a raw failure belong to?
//!
//! ## Example
//!
//! ```rust
//! use bulwark_core::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let breaker = CircuitBreaker::new("billing", CircuitBreakerConfig {
//!     failure_threshold: 2,
//!     ..Default::default()
//! });
//!
//! breaker.record_failure();
//! breaker.record_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.can_request());
//! ```

pub mod breaker;
pub mod clock;
pub mod duration;
pub mod error;
pub mod policy;
pub mod request;
pub mod retry;

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{
    ConfigError, ErrorKind, ErrorNormalizer, NoResponseReason, NormalizedError, TransportError,
};
pub use policy::{validate_timeout, OperationCategory, OperationPolicy, OperationPolicyTable};
pub use request::{CallDescriptor, CallDescriptorBuilder, Headers, Method};
pub use retry::{BackoffConfig, RetryPolicy};
