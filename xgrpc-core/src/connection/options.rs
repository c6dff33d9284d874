use crate::config::{ConfigError, DEFAULT_TIMEOUT, deserialize_duration};
use crate::grpc::MessageLimits;
use serde::Deserialize;
use std::time::Duration;

/// Options accepted by [`Connector::connect`](super::Connector::connect).
///
/// Deserializable from a JSON object with camelCase keys; unknown keys are rejected.
///
/// ```
/// # use xgrpc_core::connection::ConnectOptions;
/// let options = ConnectOptions::from_value(serde_json::json!({
///     "plaintext": true,
///     "timeout": "5s",
///     "shareConn": true,
/// }))
/// .unwrap();
///
/// assert!(options.plaintext && options.share_conn);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct ConnectOptions {
    /// Dial without TLS.
    pub plaintext: bool,
    /// Upper bound for dialing and for the reflection bootstrap.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Load the server's schema through reflection once connected.
    pub reflect: bool,
    /// Maximum size of a received message in bytes. `0` keeps the transport default.
    pub max_receive_size: u64,
    /// Maximum size of a sent message in bytes. `0` keeps the transport default.
    pub max_send_size: u64,
    /// Reuse (or register) the connection in the environment's pool, keyed by target.
    pub share_conn: bool,
    /// Overrides the environment's user agent.
    pub user_agent: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            plaintext: false,
            timeout: DEFAULT_TIMEOUT,
            reflect: false,
            max_receive_size: 0,
            max_send_size: 0,
            share_conn: false,
            user_agent: None,
        }
    }
}

impl ConnectOptions {
    /// Parses an options bag. `null` yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn limits(&self) -> MessageLimits {
        MessageLimits {
            max_receive_size: size_limit(self.max_receive_size),
            max_send_size: size_limit(self.max_send_size),
        }
    }
}

fn size_limit(bytes: u64) -> Option<usize> {
    (bytes > 0).then(|| usize::try_from(bytes).unwrap_or(usize::MAX))
}
