//! Service configuration.
//!
//! A services file lists every upstream the process talks to. Each upstream
//! gets its own breaker, gate and policy table.
//!
//! ```yaml
//! upstreams:
//!   - name: billing
//!     base_url: https://billing.internal/api
//!     max_concurrent: 8
//!     bearer_token_env: BILLING_TOKEN
//!     circuit_breaker:
//!       failure_threshold: 5
//!       reset_timeout: 30s
//!       monitoring_period: 1m
//!     policies:
//!       write: { timeout: 10s, max_retries: 0 }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use bulwark_core::{
    BackoffConfig, CircuitBreakerConfig, ConfigError, Headers, OperationCategory,
    OperationPolicy, OperationPolicyTable,
};

use crate::RuntimeError;

fn default_max_concurrent() -> usize {
    10
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// One upstream service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Identifier used in logs, errors and lookups.
    pub name: String,

    /// Prefix for relative call URLs.
    pub base_url: String,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Path probed by `health_check`.
    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub default_headers: Headers,

    /// Environment variable holding a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_env: Option<String>,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Per-category overrides of the built-in policy table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub policies: BTreeMap<OperationCategory, OperationPolicy>,
}

impl UpstreamConfig {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            max_concurrent: default_max_concurrent(),
            health_path: default_health_path(),
            default_headers: Headers::new(),
            bearer_token_env: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            backoff: BackoffConfig::default(),
            policies: BTreeMap::new(),
        }
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name",
                reason: "upstream name must not be empty".to_string(),
            }
            .into());
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(RuntimeError::InvalidConfig(format!(
                "{}: base_url must start with http:// or https://",
                self.name
            )));
        }
        if self.max_concurrent == 0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "{}: max_concurrent must be at least 1",
                self.name
            )));
        }
        self.circuit_breaker.validate()?;
        self.backoff.validate()?;
        self.policy_table()?;
        Ok(())
    }

    pub fn policy_table(&self) -> Result<OperationPolicyTable, ConfigError> {
        OperationPolicyTable::from_overrides(&self.policies)
    }
}

/// Root of a services file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesConfig {
    #[serde(default)]
    pub upstreams: Vec<UpstreamConfig>,
}

impl ServicesConfig {
    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeError> {
        let config: ServicesConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<(), RuntimeError> {
        let mut seen = HashSet::new();
        for upstream in &self.upstreams {
            upstream.validate()?;
            if !seen.insert(upstream.name.as_str()) {
                return Err(RuntimeError::DuplicateUpstream(upstream.name.clone()));
            }
        }
        Ok(())
    }

    pub fn upstream(&self, name: &str) -> Option<&UpstreamConfig> {
        self.upstreams.iter().find(|u| u.name == name)
    }
}
