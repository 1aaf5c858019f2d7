//! Realtime channel modules.
//!
//! - `client`: reconnecting channel client, lifecycle hooks and errors.
//! - `dispatch`: subscriber sets and snapshot-based fan-out.
//! - `proto`: the `{type, data}` wire envelope.
//! - `transport`: connector seam and the websocket implementation.

/// Channel client, builder and lifecycle hooks.
pub mod client;
/// Subscriber registry and subscription handles.
pub mod dispatch;
/// Wire envelope shared with the stream service.
pub mod proto;
/// Transport connectors.
pub mod transport;
