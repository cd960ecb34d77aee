//! Transport abstraction: one HTTP exchange, nothing more.
//!
//! The client never speaks HTTP itself. It hands a fully resolved
//! [`TransportRequest`] to an injected [`Transport`] and gets back either the
//! response that arrived or a [`TransportError`] saying nothing arrived.
//!
//! Enable the `reqwest-transport` feature for a reqwest-backed implementation.

use async_trait::async_trait;
use bulwark_core::{Headers, Method, TransportError};
use std::time::Duration;

#[cfg(feature = "reqwest-transport")]
mod reqwest_transport;

#[cfg(feature = "reqwest-transport")]
pub use reqwest_transport::ReqwestTransport;

/// A single attempt, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,

    /// Absolute URL
    pub url: String,

    pub headers: Headers,

    pub body: Option<Vec<u8>>,

    /// Deadline for this attempt; the client also enforces it
    pub timeout: Duration,
}

/// A response that arrived, whatever its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: body.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// Turn an error status into the transport's `Status` failure.
    pub fn error_for_status(self) -> Result<TransportResponse, TransportError> {
        if self.is_error() {
            Err(TransportError::Status {
                status: self.status,
                headers: self.headers,
                body: self.body,
            })
        } else {
            Ok(self)
        }
    }
}

/// Performs one HTTP exchange.
///
/// Implementations must not retry; the client owns retry policy. Returning
/// `Ok` for error statuses is fine, the client converts them.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Name for logs.
    fn name(&self) -> &str {
        "transport"
    }
}
