//! reqwest-backed transport.

use async_trait::async_trait;
use bulwark_core::{Headers, Method, NoResponseReason, TransportError};
use std::error::Error as _;
use std::time::Duration;

use super::{Transport, TransportRequest, TransportResponse};
use crate::RuntimeError;

/// Transport over a shared `reqwest::Client`.
///
/// Connection pooling and TLS are reqwest's; the per-attempt timeout is set
/// on every request so reqwest aborts the exchange itself.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport with a fresh client.
    pub fn new() -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("bulwark/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RuntimeError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn classify(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        return TransportError::timeout(timeout);
    }

    let reason = if error.is_connect() {
        if mentions_dns(error) {
            NoResponseReason::Dns
        } else {
            NoResponseReason::Connect
        }
    } else {
        NoResponseReason::Other
    };

    TransportError::NoResponse {
        reason,
        message: error.to_string(),
    }
}

fn mentions_dns(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(err) = source {
        if err.to_string().to_ascii_lowercase().contains("dns") {
            return true;
        }
        source = err.source();
    }
    false
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let timeout = request.timeout;
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.as_str())
            .timeout(timeout);

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(&e, timeout))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v.to_string())))
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| classify(&e, timeout))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(Method::Get), reqwest::Method::GET);
        assert_eq!(to_reqwest_method(Method::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn test_connection_refused_is_no_response() {
        let transport = ReqwestTransport::new().unwrap();
        // Port 9 (discard) on localhost is almost never listening.
        let result = transport
            .send(TransportRequest {
                method: Method::Get,
                url: "http://127.0.0.1:9/health".to_string(),
                headers: Headers::new(),
                body: None,
                timeout: Duration::from_secs(2),
            })
            .await;

        assert!(matches!(result, Err(TransportError::NoResponse { .. })));
    }
}
