//! Operation categories and their timeout/retry policies.
//!
//! Every call declares what kind of operation it is. The category, not the
//! endpoint, decides how long an attempt may take and how many times a
//! failed attempt is retried.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Caller-declared classification of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationCategory {
    /// Liveness probes.
    HealthCheck,
    /// Small, latency-sensitive reads.
    QuickRead,
    /// Ordinary reads.
    StandardRead,
    /// Mutations.
    Write,
    /// Server-side work that takes a while (reports, reindexing).
    LongOperation,
    /// Large uploads and downloads.
    BulkTransfer,
}

impl OperationCategory {
    /// All categories, shortest timeout first.
    pub const ALL: [OperationCategory; 6] = [
        OperationCategory::HealthCheck,
        OperationCategory::QuickRead,
        OperationCategory::StandardRead,
        OperationCategory::Write,
        OperationCategory::LongOperation,
        OperationCategory::BulkTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationCategory::HealthCheck => "health-check",
            OperationCategory::QuickRead => "quick-read",
            OperationCategory::StandardRead => "standard-read",
            OperationCategory::Write => "write",
            OperationCategory::LongOperation => "long-operation",
            OperationCategory::BulkTransfer => "bulk-transfer",
        }
    }

    /// Built-in policy for this category.
    pub fn default_policy(&self) -> OperationPolicy {
        let (secs, max_retries) = match self {
            OperationCategory::HealthCheck => (5, 2),
            OperationCategory::QuickRead => (10, 3),
            OperationCategory::StandardRead => (15, 3),
            OperationCategory::Write => (30, 2),
            OperationCategory::LongOperation => (120, 1),
            OperationCategory::BulkTransfer => (300, 1),
        };
        OperationPolicy::new(Duration::from_secs(secs), max_retries)
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCategory {
    type Err = ConfigError;

    /// Accepts kebab-case, snake_case and CamelCase spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        OperationCategory::ALL
            .into_iter()
            .find(|category| category.as_str().replace('-', "") == normalized)
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// Timeout and retry budget for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPolicy {
    /// Deadline for a single attempt.
    #[serde(with = "crate::duration")]
    pub timeout: Duration,

    /// Retries after the first attempt; a call makes at most
    /// `max_retries + 1` attempts.
    pub max_retries: u32,
}

impl OperationPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self, category: OperationCategory) -> Result<(), ConfigError> {
        validate_timeout("policies.timeout", category.as_str(), self.timeout)
    }
}

/// An attempt timeout must be non-zero; a zero deadline fails every attempt
/// before it starts.
pub fn validate_timeout(
    field: &'static str,
    subject: &str,
    timeout: Duration,
) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("timeout for '{subject}' must be greater than zero"),
        });
    }
    Ok(())
}

/// Read-only mapping from category to policy.
///
/// Always complete: categories without an override use the built-in policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPolicyTable {
    policies: BTreeMap<OperationCategory, OperationPolicy>,
}

impl OperationPolicyTable {
    /// Table with an override applied; used while assembling configuration.
    pub fn with_override(
        mut self,
        category: OperationCategory,
        policy: OperationPolicy,
    ) -> Result<Self, ConfigError> {
        policy.validate(category)?;
        self.policies.insert(category, policy);
        Ok(self)
    }

    /// Build a table from a sparse set of overrides.
    pub fn from_overrides(
        overrides: &BTreeMap<OperationCategory, OperationPolicy>,
    ) -> Result<Self, ConfigError> {
        overrides
            .iter()
            .try_fold(Self::default(), |table, (category, policy)| {
                table.with_override(*category, *policy)
            })
    }

    pub fn policy(&self, category: OperationCategory) -> OperationPolicy {
        self.policies
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.default_policy())
    }

    pub fn iter(&self) -> impl Iterator<Item = (OperationCategory, OperationPolicy)> + '_ {
        self.policies.iter().map(|(c, p)| (*c, *p))
    }
}

impl Default for OperationPolicyTable {
    fn default() -> Self {
        let policies = OperationCategory::ALL
            .into_iter()
            .map(|category| (category, category.default_policy()))
            .collect();
        Self { policies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_matches_contract() {
        let table = OperationPolicyTable::default();
        let expected = [
            (OperationCategory::HealthCheck, 5, 2),
            (OperationCategory::QuickRead, 10, 3),
            (OperationCategory::StandardRead, 15, 3),
            (OperationCategory::Write, 30, 2),
            (OperationCategory::LongOperation, 120, 1),
            (OperationCategory::BulkTransfer, 300, 1),
        ];

        for (category, secs, retries) in expected {
            let policy = table.policy(category);
            assert_eq!(policy.timeout, Duration::from_secs(secs), "{category}");
            assert_eq!(policy.max_retries, retries, "{category}");
        }
        assert_eq!(table.iter().count(), 6);
    }

    #[test]
    fn test_category_parsing_spellings() {
        assert_eq!(
            "health-check".parse::<OperationCategory>().unwrap(),
            OperationCategory::HealthCheck
        );
        assert_eq!(
            "bulk_transfer".parse::<OperationCategory>().unwrap(),
            OperationCategory::BulkTransfer
        );
        assert_eq!(
            "LongOperation".parse::<OperationCategory>().unwrap(),
            OperationCategory::LongOperation
        );
    }

    #[test]
    fn test_unknown_category_is_config_error() {
        let err = "streaming".parse::<OperationCategory>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCategory(ref name) if name == "streaming"));
    }

    #[test]
    fn test_overrides_leave_other_categories_alone() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            OperationCategory::Write,
            OperationPolicy::new(Duration::from_secs(5), 0),
        );
        let table = OperationPolicyTable::from_overrides(&overrides).unwrap();

        assert_eq!(table.policy(OperationCategory::Write).max_retries, 0);
        assert_eq!(
            table.policy(OperationCategory::QuickRead),
            OperationCategory::QuickRead.default_policy()
        );
    }

    #[test]
    fn test_zero_timeout_override_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            OperationCategory::QuickRead,
            OperationPolicy::new(Duration::ZERO, 1),
        );
        assert!(OperationPolicyTable::from_overrides(&overrides).is_err());
    }

    #[test]
    fn test_with_override_validates() {
        let err = OperationPolicyTable::default()
            .with_override(
                OperationCategory::Write,
                OperationPolicy::new(Duration::ZERO, 0),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "policies.timeout", ref reason } if reason.contains("write")
        ));

        let table = OperationPolicyTable::default()
            .with_override(
                OperationCategory::Write,
                OperationPolicy::new(Duration::from_secs(3), 0),
            )
            .unwrap();
        assert_eq!(table.policy(OperationCategory::Write).timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_max_attempts() {
        assert_eq!(OperationCategory::HealthCheck.default_policy().max_attempts(), 3);
        assert_eq!(OperationCategory::BulkTransfer.default_policy().max_attempts(), 2);
    }
}
