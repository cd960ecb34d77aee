//! Request interception points.
//!
//! Interceptors run on every attempt, after the client has resolved the URL
//! and merged default headers, and just before the request reaches the
//! transport. Cross-cutting layers (auth headers, trace propagation, request
//! signing) live here instead of in the client.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use bulwark_core::Headers;

use crate::transport::TransportRequest;
use crate::RuntimeError;

/// Mutates an outgoing attempt.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: &mut TransportRequest);

    /// Name for logs.
    fn name(&self) -> &str {
        "interceptor"
    }
}

/// Adds fixed headers unless the request already sets them.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: Headers,
}

impl StaticHeaders {
    pub fn new(headers: Headers) -> Self {
        Self { headers }
    }
}

impl RequestInterceptor for StaticHeaders {
    fn intercept(&self, request: &mut TransportRequest) {
        request.headers.merge_missing(&self.headers);
    }

    fn name(&self) -> &str {
        "static-headers"
    }
}

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// Sets `Authorization: Bearer <token>` on every attempt.
///
/// The token is held in a [`SecretString`]: it never shows up in `Debug`
/// output and is zeroed on drop. It is exposed only while writing the header.
pub struct BearerAuth {
    token: SecretString,
    source: CredentialSource,
}

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuth")
            .field("token", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}

impl BearerAuth {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            source: CredentialSource::Programmatic,
        }
    }

    /// Read the token from an environment variable.
    pub fn from_env(env_var: &str) -> Result<Self, RuntimeError> {
        let token = std::env::var(env_var).map_err(|_| {
            RuntimeError::InvalidConfig(format!(
                "bearer token not set: configure '{}' environment variable",
                env_var
            ))
        })?;
        if token.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(format!(
                "bearer token in '{}' is empty",
                env_var
            )));
        }
        Ok(Self {
            token: SecretString::from(token),
            source: CredentialSource::Environment,
        })
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }
}

impl RequestInterceptor for BearerAuth {
    fn intercept(&self, request: &mut TransportRequest) {
        // SECURITY: the only place the token is exposed
        request.headers.insert(
            "authorization",
            format!("Bearer {}", self.token.expose_secret()),
        );
    }

    fn name(&self) -> &str {
        "bearer-auth"
    }
}
