//! # bulwark-runtime
//!
//! Async execution layer for Bulwark.
//!
//! `bulwark-core` holds the deterministic pieces (breaker state machine,
//! policy table, retry arithmetic, error classification). This crate wires
//! them around a pluggable [`Transport`] on tokio:
//!
//! - [`HttpClient`]: one upstream, one breaker, one concurrency gate
//! - [`UpstreamRegistry`]: every configured upstream, keyed by name
//! - [`ServicesConfig`]: YAML services file
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bulwark_runtime::{HttpClient, ReqwestTransport};
//!
//! let client = HttpClient::builder("billing")
//!     .transport(Arc::new(ReqwestTransport::new()?))
//!     .base_url("https://billing.internal/api")
//!     .max_concurrent(8)
//!     .build()?;
//!
//! let invoice = client.get("/invoices/42").await?;
//! println!("{}", invoice.text());
//! ```

use std::path::PathBuf;
use thiserror::Error;

use bulwark_core::ConfigError;

pub mod client;
pub mod clock;
pub mod config;
pub mod gate;
pub mod interceptor;
pub mod registry;
pub mod stats;
pub mod transport;

pub use client::{CallAttempt, HttpClient, HttpClientBuilder, Response};
pub use clock::TokioClock;
pub use config::{ServicesConfig, UpstreamConfig};
pub use gate::{ConcurrencyGate, GatePermit};
pub use interceptor::{BearerAuth, CredentialSource, RequestInterceptor, StaticHeaders};
pub use registry::UpstreamRegistry;
pub use stats::{ClientStats, UpstreamSnapshot};
pub use transport::{Transport, TransportRequest, TransportResponse};

#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;

/// Errors raised while building or configuring clients.
///
/// Call failures are not here; they surface as
/// [`bulwark_core::NormalizedError`].
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Transport not configured")]
    TransportNotConfigured,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse services file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Unknown upstream: {0}")]
    UnknownUpstream(String),

    #[error("Duplicate upstream: {0}")]
    DuplicateUpstream(String),
}
