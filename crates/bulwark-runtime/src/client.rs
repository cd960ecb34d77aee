//! The resilient HTTP client for one upstream.
//!
//! `HttpClient` composes the reliability pieces around an injected transport:
//! - Concurrency gate: bounded in-flight calls, waiting without polling
//! - Circuit breaker: fail fast while the upstream is known to be down
//! - Policy table: per-category attempt timeout and retry budget
//! - Retry policy + error normalizer: retry only what can succeed next time
//!
//! # Execution Flow
//! ```text
//! acquire gate slot
//!   → breaker refuses?  → CircuitOpen (no transport call, no retries)
//!   → attempt loop:
//!       send under deadline
//!       success         → record_success, return
//!       retryable error → sleep backoff, next attempt
//!       otherwise       → record_failure, return error
//! gate slot released when the permit drops
//! ```

use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bulwark_core::{
    BackoffConfig, CallDescriptor, CircuitBreaker, CircuitBreakerConfig, Clock, ErrorNormalizer,
    Headers, Method, NormalizedError, OperationCategory, OperationPolicyTable, RetryPolicy,
    TransportError,
};

use crate::clock::TokioClock;
use crate::config::UpstreamConfig;
use crate::gate::ConcurrencyGate;
use crate::interceptor::{BearerAuth, RequestInterceptor};
use crate::stats::{ClientStats, UpstreamSnapshot};
use crate::transport::{Transport, TransportRequest, TransportResponse};
use crate::RuntimeError;

/// A successful response (status below 400).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: u16,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

impl From<TransportResponse> for Response {
    fn from(response: TransportResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
        }
    }
}

/// One attempt of a logical call.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub category: OperationCategory,

    /// Zero-based.
    pub attempt_number: u32,

    pub deadline: tokio::time::Instant,

    pub request: TransportRequest,
}

/// Resilient client for a single upstream.
///
/// Share it behind an `Arc`; breaker, gate and counters are per instance.
pub struct HttpClient {
    name: String,
    base_url: Option<String>,
    health_path: String,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    gate: ConcurrencyGate,
    policies: OperationPolicyTable,
    retry: RetryPolicy,
    normalizer: ErrorNormalizer,
    default_headers: Headers,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    stats: ClientStats,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("transport", &self.transport.name())
            .field("breaker", &self.breaker)
            .field("gate", &self.gate)
            .finish()
    }
}

impl HttpClient {
    pub fn builder(name: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(name)
    }

    /// Build a client from an upstream's configuration.
    pub fn from_config(
        config: &UpstreamConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let mut builder = HttpClientBuilder::new(config.name.clone())
            .transport(transport)
            .base_url(config.base_url.clone())
            .health_path(config.health_path.clone())
            .max_concurrent(config.max_concurrent)
            .circuit_breaker(config.circuit_breaker.clone())
            .backoff(config.backoff.clone())
            .policies(config.policy_table()?)
            .default_headers(config.default_headers.clone());

        if let Some(env_var) = &config.bearer_token_env {
            builder = builder.interceptor(Arc::new(BearerAuth::from_env(env_var)?));
        }

        builder.build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute one logical call.
    pub async fn request(&self, call: CallDescriptor) -> Result<Response, NormalizedError> {
        self.stats.record_call();
        let _permit = self.gate.acquire().await;

        if !self.breaker.can_request() {
            self.stats.record_rejected();
            tracing::warn!(upstream = %self.name, url = %call.url, "Circuit open, failing fast");
            return Err(self.normalizer.circuit_open());
        }

        let policy = self.policies.policy(call.category);
        let timeout = call.effective_timeout(policy.timeout);
        let url = self.resolve_url(&call.url);

        let mut attempt_number = 0;
        loop {
            let attempt = self.prepare_attempt(&call, &url, attempt_number, timeout);

            match self.send_attempt(attempt).await {
                Ok(response) => {
                    self.breaker.record_success();
                    self.stats.record_success();
                    return Ok(Response::from(response));
                }
                Err(raw) => {
                    let error = self.normalizer.classify(&raw);

                    if self
                        .retry
                        .should_retry(&error, attempt_number, policy.max_retries)
                    {
                        let delay = self.retry.delay_for(&error, attempt_number);
                        self.stats.record_retry();
                        tracing::warn!(
                            upstream = %self.name,
                            category = %call.category,
                            attempt = attempt_number + 1,
                            max_attempts = policy.max_attempts(),
                            kind = %error.kind(),
                            status = ?error.http_status(),
                            delay = ?delay,
                            "Attempt failed, retrying after backoff"
                        );
                        tokio::time::sleep(delay).await;
                        attempt_number += 1;
                        continue;
                    }

                    self.breaker.record_failure();
                    self.stats.record_failure();
                    tracing::warn!(
                        upstream = %self.name,
                        category = %call.category,
                        attempts = attempt_number + 1,
                        kind = %error.kind(),
                        status = ?error.http_status(),
                        error = %error,
                        "Call failed"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// GET as a standard read.
    pub async fn get(&self, url: &str) -> Result<Response, NormalizedError> {
        self.request(CallDescriptor::builder(Method::Get, url).build())
            .await
    }

    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, NormalizedError> {
        self.request(CallDescriptor::builder(Method::Post, url).body(body).build())
            .await
    }

    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Vec<u8>>,
    ) -> Result<Response, NormalizedError> {
        self.request(CallDescriptor::builder(Method::Put, url).body(body).build())
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<Response, NormalizedError> {
        self.request(CallDescriptor::builder(Method::Delete, url).build())
            .await
    }

    /// Whether `url` answers successfully. Never fails; any error is `false`.
    pub async fn health_check(&self, url: &str) -> bool {
        let call = CallDescriptor::builder(Method::Get, url)
            .category(OperationCategory::HealthCheck)
            .build();

        match self.request(call).await {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(upstream = %self.name, kind = %error.kind(), "Health check failed");
                false
            }
        }
    }

    /// Health check against the configured health path.
    pub async fn health(&self) -> bool {
        self.health_check(&self.health_path).await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    pub fn policies(&self) -> &OperationPolicyTable {
        &self.policies
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        let breaker = self.breaker.snapshot();
        UpstreamSnapshot {
            upstream: self.name.clone(),
            circuit_state: breaker.state,
            failures_in_window: breaker.failure_count,
            times_opened: breaker.times_opened,
            in_flight: self.gate.in_flight(),
            max_concurrent: self.gate.max_concurrent(),
            calls: self.stats.calls(),
            successes: self.stats.successes(),
            failures: self.stats.failures(),
            retries: self.stats.retries(),
            rejected: self.stats.rejected(),
            captured_at: chrono::Utc::now(),
        }
    }

    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) if url.is_empty() => base.clone(),
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            ),
            None => url.to_string(),
        }
    }

    fn prepare_attempt(
        &self,
        call: &CallDescriptor,
        url: &str,
        attempt_number: u32,
        timeout: Duration,
    ) -> CallAttempt {
        let mut headers = call.headers.clone();
        headers.merge_missing(&self.default_headers);

        let mut request = TransportRequest {
            method: call.method,
            url: url.to_string(),
            headers,
            body: call.body.clone(),
            timeout,
        };
        for interceptor in &self.interceptors {
            interceptor.intercept(&mut request);
        }

        CallAttempt {
            category: call.category,
            attempt_number,
            deadline: attempt_deadline(timeout),
            request,
        }
    }

    /// Send one attempt. Dropping the transport future at the deadline
    /// aborts the exchange.
    async fn send_attempt(&self, attempt: CallAttempt) -> Result<TransportResponse, TransportError> {
        tracing::debug!(
            upstream = %self.name,
            category = %attempt.category,
            attempt = attempt.attempt_number + 1,
            method = %attempt.request.method,
            url = %attempt.request.url,
            "Sending attempt"
        );

        let timeout = attempt.request.timeout;
        match tokio::time::timeout_at(attempt.deadline, self.transport.send(attempt.request)).await
        {
            Ok(Ok(response)) => response.error_for_status(),
            Ok(Err(error)) => Err(error),
            Err(_) => Err(TransportError::timeout(timeout)),
        }
    }
}

/// Roughly 30 years; the same horizon tokio uses for "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Deadline `timeout` from now. Timeouts too large to represent as an
/// `Instant` saturate to a far-future deadline.
fn attempt_deadline(timeout: Duration) -> tokio::time::Instant {
    let now = tokio::time::Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    name: String,
    transport: Option<Arc<dyn Transport>>,
    base_url: Option<String>,
    health_path: String,
    max_concurrent: usize,
    breaker_config: CircuitBreakerConfig,
    backoff: BackoffConfig,
    policies: OperationPolicyTable,
    default_headers: Headers,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    clock: Arc<dyn Clock>,
}

impl HttpClientBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: None,
            base_url: None,
            health_path: "/health".to_string(),
            max_concurrent: 10,
            breaker_config: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            policies: OperationPolicyTable::default(),
            default_headers: Headers::new(),
            interceptors: Vec::new(),
            clock: Arc::new(TokioClock),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn policies(mut self, policies: OperationPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn default_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn default_headers(mut self, headers: Headers) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Time source for the breaker. Defaults to tokio's clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<HttpClient, RuntimeError> {
        let transport = self.transport.ok_or(RuntimeError::TransportNotConfigured)?;
        self.breaker_config.validate()?;
        self.backoff.validate()?;
        let gate = ConcurrencyGate::new(self.max_concurrent)?;

        Ok(HttpClient {
            breaker: CircuitBreaker::with_clock(self.name.clone(), self.breaker_config, self.clock),
            normalizer: ErrorNormalizer::new(self.name.clone()),
            name: self.name,
            base_url: self.base_url,
            health_path: self.health_path,
            transport,
            gate,
            policies: self.policies,
            retry: RetryPolicy::new(self.backoff),
            default_headers: self.default_headers,
            interceptors: self.interceptors,
            stats: ClientStats::new(),
        })
    }
}
