//! Error taxonomy and classification.
//!
//! Transports report raw failures as [`TransportError`]. The
//! [`ErrorNormalizer`] turns each one into a [`NormalizedError`] whose
//! [`ErrorKind`] is stable and safe to branch on. Callers never see a raw
//! transport error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::request::Headers;

/// Longest body excerpt carried into an error message.
const BODY_EXCERPT_LIMIT: usize = 200;

/// Configuration problems. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown operation category: '{0}'")]
    UnknownCategory(String),

    #[error("Unknown HTTP method: '{0}'")]
    UnknownMethod(String),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Why no response was received.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResponseReason {
    Connect,
    Dns,
    Timeout,
    Other,
}

impl fmt::Display for NoResponseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoResponseReason::Connect => write!(f, "connection failed"),
            NoResponseReason::Dns => write!(f, "name resolution failed"),
            NoResponseReason::Timeout => write!(f, "timed out"),
            NoResponseReason::Other => write!(f, "transport error"),
        }
    }
}

/// Raw failure of one HTTP exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing came back from the upstream.
    #[error("No response ({reason}): {message}")]
    NoResponse {
        reason: NoResponseReason,
        message: String,
    },

    /// A response arrived with an error status.
    #[error("HTTP {status}")]
    Status {
        status: u16,
        headers: Headers,
        body: Vec<u8>,
    },
}

impl TransportError {
    pub fn timeout(after: Duration) -> Self {
        TransportError::NoResponse {
            reason: NoResponseReason::Timeout,
            message: format!("no response within {:?}", after),
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        TransportError::NoResponse {
            reason: NoResponseReason::Connect,
            message: message.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        TransportError::Status {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

/// Stable classification of a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportFailure,
    ServerError,
    RateLimited,
    Unauthorized,
    NotFound,
    ClientError,
    CircuitOpen,
}

impl ErrorKind {
    /// Whether another attempt could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportFailure | ErrorKind::ServerError | ErrorKind::RateLimited
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportFailure => "transport_failure",
            ErrorKind::ServerError => "server_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ClientError => "client_error",
            ErrorKind::CircuitOpen => "circuit_open",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The only error a caller of the client ever receives.
///
/// Immutable once built; all fields are read through accessors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct NormalizedError {
    kind: ErrorKind,
    http_status: Option<u16>,
    message: String,
    retryable: bool,
    retry_after: Option<Duration>,
}

impl NormalizedError {
    fn new(kind: ErrorKind, http_status: Option<u16>, message: String) -> Self {
        Self {
            kind,
            http_status,
            message,
            retryable: kind.is_retryable(),
            retry_after: None,
        }
    }

    fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Server-requested wait from a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

/// Classifies raw failures for one upstream.
#[derive(Debug, Clone)]
pub struct ErrorNormalizer {
    upstream: String,
}

impl ErrorNormalizer {
    pub fn new(upstream: impl Into<String>) -> Self {
        Self {
            upstream: upstream.into(),
        }
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// Map a raw transport failure onto the taxonomy.
    pub fn classify(&self, raw: &TransportError) -> NormalizedError {
        let upstream = &self.upstream;

        match raw {
            TransportError::NoResponse { reason, message } => NormalizedError::new(
                ErrorKind::TransportFailure,
                None,
                format!("{upstream} is unreachable ({reason}): {message}"),
            ),
            TransportError::Status {
                status,
                headers,
                body,
            } => {
                let status = *status;
                let detail = body_excerpt(body)
                    .map(|excerpt| format!(": {excerpt}"))
                    .unwrap_or_default();

                match status {
                    s if s >= 500 => NormalizedError::new(
                        ErrorKind::ServerError,
                        Some(status),
                        format!("{upstream} failed with HTTP {status}; the service may be degraded{detail}"),
                    )
                    .with_retry_after(if status == 503 {
                        parse_retry_after(headers)
                    } else {
                        None
                    }),
                    429 => NormalizedError::new(
                        ErrorKind::RateLimited,
                        Some(status),
                        format!("{upstream} is rate limiting requests (HTTP 429)"),
                    )
                    .with_retry_after(parse_retry_after(headers)),
                    401 | 403 => NormalizedError::new(
                        ErrorKind::Unauthorized,
                        Some(status),
                        format!("{upstream} rejected the credentials (HTTP {status})"),
                    ),
                    404 => NormalizedError::new(
                        ErrorKind::NotFound,
                        Some(status),
                        format!("{upstream} has no such resource (HTTP 404)"),
                    ),
                    _ => NormalizedError::new(
                        ErrorKind::ClientError,
                        Some(status),
                        format!("{upstream} rejected the request (HTTP {status}){detail}"),
                    ),
                }
            }
        }
    }

    /// Error returned when the breaker refuses admission.
    pub fn circuit_open(&self) -> NormalizedError {
        NormalizedError::new(
            ErrorKind::CircuitOpen,
            None,
            format!(
                "{} is temporarily unavailable; circuit breaker is open",
                self.upstream
            ),
        )
    }
}

/// `Retry-After` in delta-seconds form, read for 429 and 503 only.
/// HTTP-date values are ignored.
fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn body_excerpt(body: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let excerpt: String = text.chars().take(BODY_EXCERPT_LIMIT).collect();
    if excerpt.len() < text.len() {
        Some(format!("{excerpt}..."))
    } else {
        Some(excerpt)
    }
}
