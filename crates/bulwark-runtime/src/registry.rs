//! Registry of configured upstreams.
//!
//! Each upstream gets its own [`HttpClient`], so a failing upstream opens only
//! its own breaker and exhausts only its own gate.
//!
//! ## Usage
//!
//! ```ignore
//! let config = ServicesConfig::from_yaml_file("services.yaml")?;
//! let registry = UpstreamRegistry::from_config(&config, transport)?;
//!
//! let billing = registry.client("billing")?;
//! let invoice = billing.get("/invoices/42").await?;
//! ```

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::client::HttpClient;
use crate::config::ServicesConfig;
use crate::stats::UpstreamSnapshot;
use crate::transport::Transport;
use crate::RuntimeError;

/// Clients keyed by upstream name.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    clients: BTreeMap<String, Arc<HttpClient>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one client per configured upstream, all sharing `transport`.
    pub fn from_config(
        config: &ServicesConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;

        let mut registry = Self::new();
        for upstream in &config.upstreams {
            let client = HttpClient::from_config(upstream, Arc::clone(&transport))?;
            registry.register(Arc::new(client));
        }

        tracing::info!(upstreams = registry.len(), "Upstream registry ready");
        Ok(registry)
    }

    /// Register a client under its name, replacing any existing one.
    pub fn register(&mut self, client: Arc<HttpClient>) {
        self.clients.insert(client.name().to_string(), client);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<HttpClient>> {
        self.clients.get(name)
    }

    /// Like [`get`](Self::get) but unknown names are an error.
    pub fn client(&self, name: &str) -> Result<Arc<HttpClient>, RuntimeError> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownUpstream(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.clients.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Probe every upstream concurrently.
    pub async fn health_check_all(&self) -> BTreeMap<String, bool> {
        let probes = self.clients.iter().map(|(name, client)| async move {
            (name.clone(), client.health().await)
        });
        join_all(probes).await.into_iter().collect()
    }

    pub fn snapshots(&self) -> Vec<UpstreamSnapshot> {
        self.clients.values().map(|c| c.snapshot()).collect()
    }
}
