//! Construction-time configuration for channels and channel registries.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::ReconnectPolicy;

/// Default values applied when options leave a field unset.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelDefaults;

impl ChannelDefaults {
    pub const RECONNECT: bool = true;
    pub const RECONNECT_INTERVAL_MS: u64 = 5_000;
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
}

/// Options for a single realtime channel.
///
/// Keys use camelCase so the same JSON blob the dashboard ships with can be
/// deserialized directly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOptions {
    /// Stream endpoint, `ws://` or `wss://`.
    pub url: String,
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl ChannelOptions {
    /// Options for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ChannelDefaults::RECONNECT,
            reconnect_interval_ms: ChannelDefaults::RECONNECT_INTERVAL_MS,
            max_reconnect_attempts: ChannelDefaults::MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Enables or disables automatic reconnects.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the fixed delay between a close and the next attempt.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
        self
    }

    /// Caps consecutive reconnects without a successful open.
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Reconnect policy described by these options.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.reconnect,
            interval: Duration::from_millis(self.reconnect_interval_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

fn default_reconnect() -> bool {
    ChannelDefaults::RECONNECT
}

fn default_reconnect_interval_ms() -> u64 {
    ChannelDefaults::RECONNECT_INTERVAL_MS
}

fn default_max_reconnect_attempts() -> u32 {
    ChannelDefaults::MAX_RECONNECT_ATTEMPTS
}

/// Options for every channel owned by a [`crate::registry::ChannelRegistry`],
/// keyed by channel name.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelOptions>,
}

impl RegistryConfig {
    /// Parses a registry configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Adds or replaces the options for `name`.
    pub fn with_channel(mut self, name: impl Into<String>, options: ChannelOptions) -> Self {
        self.channels.insert(name.into(), options);
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ChannelOptions, RegistryConfig};

    #[test]
    fn missing_fields_take_defaults() {
        let options: ChannelOptions =
            serde_json::from_str(r#"{"url":"ws://localhost:8000/ws/market"}"#).expect("parse");
        assert_eq!(options, ChannelOptions::new("ws://localhost:8000/ws/market"));

        let policy = options.reconnect_policy();
        assert!(policy.enabled);
        assert_eq!(policy.interval, Duration::from_millis(5_000));
        assert_eq!(policy.max_attempts, 10);
    }

    #[test]
    fn camel_case_keys_are_honored() {
        let options: ChannelOptions = serde_json::from_str(
            r#"{"url":"ws://x","reconnect":false,"reconnectIntervalMs":100,"maxReconnectAttempts":2}"#,
        )
        .expect("parse");
        assert!(!options.reconnect);
        assert_eq!(options.reconnect_interval_ms, 100);
        assert_eq!(options.max_reconnect_attempts, 2);
    }

    #[test]
    fn url_is_required() {
        assert!(serde_json::from_str::<ChannelOptions>(r#"{"reconnect":true}"#).is_err());
    }

    #[test]
    fn registry_config_parses_named_channels() {
        let config = RegistryConfig::from_json(
            r#"{"channels":{
                "market":{"url":"ws://localhost:8000/ws/market"},
                "signals":{"url":"ws://localhost:8000/ws/signals","maxReconnectAttempts":3}
            }}"#,
        )
        .expect("parse");

        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels["signals"].max_reconnect_attempts, 3);
        assert_eq!(config.channels["market"].max_reconnect_attempts, 10);
    }
}
