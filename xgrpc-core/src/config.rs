//! # Option Bags
//!
//! Connect and invoke options arrive as loosely typed JSON objects (the shape a scripting host
//! hands over). They are deserialized into typed structs that reject unknown keys, and
//! durations are accepted either as humantime strings (`"1.5s"`, `"250ms"`) or as integer
//! milliseconds.
use serde::{Deserialize, Deserializer, de};
use std::time::Duration;

/// Default timeout for both dialing and invoking.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid options: '{0}'")]
    Invalid(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Millis(u64),
    Text(String),
}

/// Deserializes a [`Duration`] from a humantime string or an integer amount of milliseconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Millis(millis) => Ok(Duration::from_millis(millis)),
        RawDuration::Text(text) => humantime::parse_duration(text.trim())
            .map_err(|e| de::Error::custom(format!("invalid duration '{text}': {e}"))),
    }
}
