use crate::config::{ConfigError, DEFAULT_TIMEOUT, deserialize_duration};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Per-call options of [`Client::invoke`](super::Client::invoke).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Call metadata. Keys are lowercased.
    pub metadata: Vec<(String, String)>,
    /// Deadline of the call, sent as `grpc-timeout` and enforced locally.
    pub timeout: Duration,
    /// Extra observability tags. A `name` tag replaces the default call name.
    pub tags: BTreeMap<String, String>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            metadata: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInvokeOptions {
    #[serde(default)]
    metadata: Option<BTreeMap<String, String>>,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    timeout: Duration,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl InvokeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.metadata
            .push((key.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Parses an options bag with the keys `metadata`, `timeout` and `tags`.
    ///
    /// `headers` is still accepted as a deprecated spelling of `metadata`; when both are given
    /// `metadata` wins. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(Self::default());
        }

        let raw: RawInvokeOptions = serde_json::from_value(value)?;

        if raw.headers.is_some() {
            warn!("The 'headers' option is deprecated, use 'metadata' instead");
        }

        let metadata = raw
            .metadata
            .or(raw.headers)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();

        Ok(Self {
            metadata,
            timeout: raw.timeout,
            tags: raw.tags,
        })
    }
}
