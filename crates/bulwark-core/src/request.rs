//! Call descriptors: what the caller asks the client to do.
//!
//! A [`CallDescriptor`] enumerates exactly the recognised request fields.
//! Deserialising one from JSON/YAML fails on unknown keys, so a typo such as
//! `timout_override` is a configuration error instead of a silently ignored
//! option.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::policy::{validate_timeout, OperationCategory};

/// HTTP method of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
}

impl Method {
    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(ConfigError::UnknownMethod(s.to_string())),
        }
    }
}

/// Case-insensitive header map.
///
/// Names are stored lower-cased; iteration order is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>")]
pub struct Headers(BTreeMap<String, String>);

impl From<BTreeMap<String, String>> for Headers {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value for the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.0
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(&name.to_ascii_lowercase())
    }

    /// Copy every header from `other` that is not already set here.
    pub fn merge_missing(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.0
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// One logical call against an upstream.
///
/// `url` may be absolute or a path relative to the upstream's base URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallDescriptor {
    /// Selects the timeout and retry budget.
    pub category: OperationCategory,

    pub method: Method,

    pub url: String,

    #[serde(default, skip_serializing_if = "Headers::is_empty")]
    pub headers: Headers,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Vec<u8>>,

    /// Replaces the category timeout for this call only.
    #[serde(
        default,
        serialize_with = "crate::duration::option::serialize",
        deserialize_with = "deserialize_timeout_override",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout_override: Option<Duration>,
}

impl CallDescriptor {
    /// Start building a descriptor.
    pub fn builder(method: Method, url: impl Into<String>) -> CallDescriptorBuilder {
        CallDescriptorBuilder::new(method, url)
    }

    /// Timeout for one attempt of this call given the category default.
    /// A zero override is ignored.
    pub fn effective_timeout(&self, category_timeout: Duration) -> Duration {
        self.timeout_override
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or(category_timeout)
    }
}

fn deserialize_timeout_override<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let timeout = crate::duration::option::deserialize(deserializer)?;
    if let Some(timeout) = timeout {
        validate_timeout("timeout_override", "call", timeout).map_err(serde::de::Error::custom)?;
    }
    Ok(timeout)
}

/// Builder for [`CallDescriptor`].
///
/// The category defaults to `StandardRead` for reads and `Write` for
/// everything else.
#[derive(Debug, Clone)]
pub struct CallDescriptorBuilder {
    method: Method,
    url: String,
    category: Option<OperationCategory>,
    headers: Headers,
    body: Option<Vec<u8>>,
    timeout_override: Option<Duration>,
}

impl CallDescriptorBuilder {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            category: None,
            headers: Headers::new(),
            body: None,
            timeout_override: None,
        }
    }

    pub fn category(mut self, category: OperationCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `content-type`.
    pub fn json<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        self.headers.insert("content-type", "application/json");
        self.body = Some(bytes);
        Ok(self)
    }

    /// Per-call attempt timeout. `Duration::ZERO` leaves the category
    /// timeout in effect.
    pub fn timeout_override(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout).filter(|timeout| !timeout.is_zero());
        self
    }

    pub fn build(self) -> CallDescriptor {
        let category = self.category.unwrap_or(match self.method {
            Method::Get | Method::Head | Method::Options => OperationCategory::StandardRead,
            _ => OperationCategory::Write,
        });

        CallDescriptor {
            category,
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            timeout_override: self.timeout_override,
        }
    }
}
