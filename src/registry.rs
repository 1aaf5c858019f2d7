//! Named channel container.
//!
//! The dashboard runs one channel per stream (market data, trading signals).
//! A [`ChannelRegistry`] owns those clients and hands out handles, so
//! consumers receive their channel explicitly instead of reaching for a
//! process-wide instance.

use std::collections::BTreeMap;

use tracing::debug;

use crate::channel::client::{ChannelBuilder, ChannelClient, ChannelError};
use crate::config::RegistryConfig;

/// Conventional name of the market data channel.
pub const MARKET_CHANNEL: &str = "market";
/// Conventional name of the trading signal channel.
pub const SIGNAL_CHANNEL: &str = "signals";

/// Independent channel clients keyed by name. Clients share no state.
#[derive(Clone, Debug, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, ChannelClient>,
}

impl ChannelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one websocket client per configured channel.
    pub fn from_config(config: RegistryConfig) -> Result<Self, ChannelError> {
        Self::from_config_with(config, |_, builder| builder)
    }

    /// Builds one client per configured channel, letting `customize` attach
    /// hooks, API keys or connectors to each builder first.
    pub fn from_config_with<F>(
        config: RegistryConfig,
        mut customize: F,
    ) -> Result<Self, ChannelError>
    where
        F: FnMut(&str, ChannelBuilder) -> ChannelBuilder,
    {
        let mut registry = Self::new();
        for (name, options) in config.channels {
            let builder = ChannelClient::builder(options).with_name(name.clone());
            let client = customize(&name, builder).with_name(name.clone()).build()?;
            registry.channels.insert(name, client);
        }
        Ok(registry)
    }

    /// Adds `client` under its name, returning any client it replaced.
    pub fn insert(&mut self, client: ChannelClient) -> Option<ChannelClient> {
        self.channels.insert(client.name().to_string(), client)
    }

    /// Borrows the channel registered as `name`.
    pub fn get(&self, name: &str) -> Option<&ChannelClient> {
        self.channels.get(name)
    }

    /// Returns a handle to the channel registered as `name`.
    pub fn channel(&self, name: &str) -> Result<ChannelClient, ChannelError> {
        self.channels
            .get(name)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownChannel(name.to_string()))
    }

    /// Registered channel names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// True when no channel is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Calls `connect` on every channel.
    pub fn connect_all(&self) {
        for (name, client) in &self.channels {
            debug!(event = "registry_connect", channel = %name);
            client.connect();
        }
    }

    /// Calls `disconnect` on every channel.
    pub fn disconnect_all(&self) {
        for (name, client) in &self.channels {
            debug!(event = "registry_disconnect", channel = %name);
            client.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{ChannelRegistry, MARKET_CHANNEL, SIGNAL_CHANNEL};
    use crate::channel::client::{ChannelClient, ChannelError, ConnectionState};
    use crate::config::{ChannelOptions, RegistryConfig};

    fn config() -> RegistryConfig {
        RegistryConfig::default()
            .with_channel(
                MARKET_CHANNEL,
                ChannelOptions::new("ws://localhost:8000/ws/market"),
            )
            .with_channel(
                SIGNAL_CHANNEL,
                ChannelOptions::new("ws://localhost:8000/ws/signals")
                    .with_max_reconnect_attempts(3),
            )
    }

    #[test]
    fn builds_one_independent_client_per_channel() {
        let registry = ChannelRegistry::from_config(config()).expect("registry");

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec![MARKET_CHANNEL, SIGNAL_CHANNEL]
        );

        let market = registry.channel(MARKET_CHANNEL).expect("market");
        let signals = registry.channel(SIGNAL_CHANNEL).expect("signals");
        assert_eq!(market.url(), "ws://localhost:8000/ws/market");
        assert_eq!(signals.name(), SIGNAL_CHANNEL);

        market.subscribe("price_update", |_| {}).expect("subscribe");
        assert_eq!(market.subscriber_count("price_update"), 1);
        assert_eq!(signals.subscriber_count("price_update"), 0);
        assert_eq!(signals.state(), ConnectionState::Idle);
    }

    #[test]
    fn handles_share_the_registered_client() {
        let registry = ChannelRegistry::from_config(config()).expect("registry");
        let first = registry.channel(MARKET_CHANNEL).expect("market");
        let second = registry.get(MARKET_CHANNEL).expect("market");

        first.subscribe("*", |_| {}).expect("subscribe");
        assert_eq!(second.subscriber_count("*"), 1);
    }

    #[test]
    fn unknown_channel_is_an_error() {
        let registry = ChannelRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.channel("orders"),
            Err(ChannelError::UnknownChannel(name)) if name == "orders"
        ));
    }

    #[test]
    fn invalid_channel_url_fails_the_whole_registry() {
        let config = config().with_channel("broken", ChannelOptions::new("http://nope"));
        assert!(matches!(
            ChannelRegistry::from_config(config),
            Err(ChannelError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn customize_sees_every_channel_and_keeps_registry_names() {
        let visited = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&visited);
        let registry = ChannelRegistry::from_config_with(config(), move |_, builder| {
            counter.fetch_add(1, Ordering::SeqCst);
            builder.with_name("renamed")
        })
        .expect("registry");

        assert_eq!(visited.load(Ordering::SeqCst), 2);
        assert!(registry.get(MARKET_CHANNEL).is_some());
        assert_eq!(
            registry.get(SIGNAL_CHANNEL).map(ChannelClient::name),
            Some(SIGNAL_CHANNEL)
        );
    }

    #[test]
    fn insert_replaces_by_name() {
        let mut registry = ChannelRegistry::new();
        let client = ChannelClient::builder(ChannelOptions::new("ws://a"))
            .with_name(MARKET_CHANNEL)
            .build()
            .expect("client");
        assert!(registry.insert(client).is_none());

        let replacement = ChannelClient::builder(ChannelOptions::new("ws://b"))
            .with_name(MARKET_CHANNEL)
            .build()
            .expect("client");
        let previous = registry.insert(replacement).expect("replaced");
        assert_eq!(previous.url(), "ws://a");
        assert_eq!(registry.len(), 1);
    }
}
