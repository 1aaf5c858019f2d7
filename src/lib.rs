//! Realtime channel SDK for the tradedesk dashboard.
//!
//! The crate is organized by concern:
//! - `channel`: reconnecting stream client with typed pub/sub dispatch.
//! - `registry`: one client per named stream, owned explicitly by the caller.
//! - `config`: serde-loadable channel options and their defaults.
//! - `retry`: fixed-interval reconnect policy.

/// Realtime channel client, wire protocol, dispatch and transports.
pub mod channel;
/// Channel and registry configuration.
pub mod config;
/// Named channel container.
pub mod registry;
/// Reconnect policy used by channel clients.
pub mod retry;

pub use channel::client::{
    ChannelBuilder, ChannelClient, ChannelError, ChannelHooks, ConnectionState,
};
pub use channel::dispatch::Subscription;
pub use channel::proto::{Envelope, WILDCARD};
pub use config::{ChannelOptions, RegistryConfig};
pub use registry::ChannelRegistry;
