//! Reconnecting realtime channel client.
//!
//! A [`ChannelClient`] keeps one best-effort connection to a stream endpoint,
//! fans inbound envelopes out to subscribers by message type and reconnects
//! on a fixed interval after the connection drops. Each connection attempt
//! runs on its own spawned worker task which owns the transport; the client
//! handle only keeps a queue sender into it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, warn};

use crate::channel::dispatch::{decoding, Callback, SubscriberRegistry, Subscription};
use crate::channel::proto::{Envelope, InboundFrame, WILDCARD};
use crate::channel::transport::{ConnectRequest, Connector, Transport, WebSocketConnector};
use crate::config::ChannelOptions;
use crate::retry::ReconnectPolicy;

/// Observable connection state of a channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// Constructed, never connected.
    Idle,
    /// A connect attempt is in flight.
    Connecting,
    /// The transport is live and frames are dispatched.
    Open,
    /// The last connection closed or failed. A reconnect may be pending.
    Closed,
}

/// Errors produced by channel construction, transport and protocol handling.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// API key could not be converted to a valid HTTP header value.
    #[error("invalid api-key header: {0}")]
    InvalidApiKeyHeader(#[from] InvalidHeaderValue),

    /// Endpoint is not a usable websocket URL.
    #[error("invalid channel url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Subscriptions need a non-empty message type.
    #[error("subscription message type must not be empty")]
    InvalidSubscription,

    /// No channel is registered under the requested name.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// Transport or peer contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

type LifecycleHook = Arc<dyn Fn() + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ChannelError) + Send + Sync>;

/// Optional lifecycle callbacks.
///
/// Hooks run on the channel's worker task, never while internal locks are
/// held, so they may call back into the client.
#[derive(Clone, Default)]
pub struct ChannelHooks {
    on_open: Option<LifecycleHook>,
    on_close: Option<LifecycleHook>,
    on_error: Option<ErrorHook>,
    on_reconnect_exhausted: Option<LifecycleHook>,
}

impl ChannelHooks {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired on every transition to `Open`.
    pub fn on_open(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(hook));
        self
    }

    /// Fired on every transition to `Closed`, including failed opens and
    /// explicit disconnects of an open connection.
    pub fn on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Fired with the raw transport error when an open fails or a live
    /// connection errors.
    pub fn on_error(mut self, hook: impl Fn(&ChannelError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Fired when a close finds the reconnect budget spent. The channel stays
    /// `Closed` until `connect` is called again.
    pub fn on_reconnect_exhausted(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reconnect_exhausted = Some(Arc::new(hook));
        self
    }

    fn fire_open(&self) {
        if let Some(hook) = self.on_open.as_ref() {
            hook();
        }
    }

    fn fire_close(&self) {
        if let Some(hook) = self.on_close.as_ref() {
            hook();
        }
    }

    fn fire_error(&self, err: &ChannelError) {
        if let Some(hook) = self.on_error.as_ref() {
            hook(err);
        }
    }

    fn fire_reconnect_exhausted(&self) {
        if let Some(hook) = self.on_reconnect_exhausted.as_ref() {
            hook();
        }
    }
}

impl fmt::Debug for ChannelHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_reconnect_exhausted", &self.on_reconnect_exhausted.is_some())
            .finish()
    }
}

/// Builder for [`ChannelClient`].
pub struct ChannelBuilder {
    name: Option<String>,
    options: ChannelOptions,
    api_key: Option<SecretString>,
    hooks: ChannelHooks,
    connector: Arc<dyn Connector>,
}

impl ChannelBuilder {
    /// Sets the name used in diagnostics and registry lookups.
    ///
    /// Defaults to the endpoint URL.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sends `api_key` as the `x-api-key` header on every upgrade request.
    pub fn with_api_key(mut self, api_key: SecretString) -> Self {
        self.api_key = Some(api_key);
        self
    }

    /// Replaces the lifecycle hooks.
    pub fn with_hooks(mut self, hooks: ChannelHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replaces the websocket connector.
    pub fn with_connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Validates the configuration and creates an `Idle` client.
    pub fn build(self) -> Result<ChannelClient, ChannelError> {
        let url = self.options.url.trim().to_string();
        validate_url(&url)?;

        let request = ConnectRequest {
            url: url.clone(),
            api_key: self.api_key,
        };
        request.client_request()?;

        Ok(ChannelClient {
            inner: Arc::new(ChannelInner {
                name: self.name.unwrap_or_else(|| url.clone()),
                request,
                connector: self.connector,
                hooks: self.hooks,
                subscribers: SubscriberRegistry::default(),
                gate: FireGate::default(),
                state: Mutex::new(ChannelState {
                    connection: ConnectionState::Idle,
                    policy: self.options.reconnect_policy(),
                    retry_count: 0,
                    generation: 0,
                    link: None,
                    reconnect_timer: None,
                }),
            }),
        })
    }
}

fn validate_url(url: &str) -> Result<(), ChannelError> {
    let invalid = |reason: &str| ChannelError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(invalid("missing scheme"));
    };
    if !matches!(scheme.to_ascii_lowercase().as_str(), "ws" | "wss") {
        return Err(invalid("scheme must be ws or wss"));
    }
    if rest.is_empty() || rest.starts_with('/') {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Handle to one realtime channel.
///
/// Cloning is cheap and every clone drives the same connection. Dropping the
/// last clone closes the connection and cancels pending reconnects.
///
/// `connect` spawns tasks and is ignored with a warning outside a tokio
/// runtime.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    name: String,
    request: ConnectRequest,
    connector: Arc<dyn Connector>,
    hooks: ChannelHooks,
    subscribers: SubscriberRegistry,
    gate: FireGate,
    state: Mutex<ChannelState>,
}

struct ChannelState {
    connection: ConnectionState,
    policy: ReconnectPolicy,
    retry_count: u32,
    generation: u64,
    link: Option<Link>,
    reconnect_timer: Option<JoinHandle<()>>,
}

/// Serializes user callbacks against `disconnect`.
///
/// Workers hold the gate while re-checking their generation and firing, so a
/// `disconnect` that returns has waited out any callback already in flight.
/// Re-entry from the thread holding the gate passes straight through, which
/// lets callbacks call back into the client.
#[derive(Default)]
struct FireGate {
    lock: Mutex<()>,
    holder: Mutex<Option<ThreadId>>,
}

struct GateGuard<'a> {
    gate: &'a FireGate,
    lock: Option<MutexGuard<'a, ()>>,
}

impl FireGate {
    fn enter(&self) -> GateGuard<'_> {
        let current = thread::current().id();
        if *self.holder_slot() == Some(current) {
            return GateGuard {
                gate: self,
                lock: None,
            };
        }
        let lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *self.holder_slot() = Some(current);
        GateGuard {
            gate: self,
            lock: Some(lock),
        }
    }

    fn holder_slot(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        if self.lock.is_some() {
            *self.gate.holder_slot() = None;
        }
    }
}

/// The single live transport handle. Dropping `outbound` tells the worker
/// to close the transport.
struct Link {
    outbound: mpsc::UnboundedSender<String>,
    worker: JoinHandle<()>,
}

impl ChannelClient {
    /// Starts building a client for `options` using the websocket connector.
    pub fn builder(options: ChannelOptions) -> ChannelBuilder {
        ChannelBuilder {
            name: None,
            options,
            api_key: None,
            hooks: ChannelHooks::default(),
            connector: Arc::new(WebSocketConnector),
        }
    }

    /// Creates a client with default hooks and the websocket connector.
    pub fn new(options: ChannelOptions) -> Result<Self, ChannelError> {
        Self::builder(options).build()
    }

    /// Name used in diagnostics and registry lookups.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Endpoint this client connects to.
    pub fn url(&self) -> &str {
        &self.inner.request.url
    }

    /// Opens the connection unless one is already connecting or open.
    pub fn connect(&self) {
        let mut state = self.inner.lock_state();
        if matches!(
            state.connection,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!(
                event = "connect_ignored",
                channel = %self.inner.name,
                state = ?state.connection
            );
            return;
        }
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        self.inner.start_connecting(&mut state);
    }

    /// Closes the connection and permanently disables automatic reconnects
    /// for this client. Safe to call in any state.
    pub fn disconnect(&self) {
        let _gate = self.inner.gate.enter();
        let mut state = self.inner.lock_state();
        state.policy.enabled = false;
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }

        let previous = state.connection;
        if let Some(link) = state.link.take() {
            if previous == ConnectionState::Connecting {
                link.worker.abort();
            }
        }
        state.generation += 1;
        if matches!(
            previous,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            state.connection = ConnectionState::Closed;
        }
        drop(state);

        debug!(
            event = "channel_disconnected",
            channel = %self.inner.name,
            previous = ?previous
        );
        if previous == ConnectionState::Open {
            self.inner.hooks.fire_close();
        }
    }

    /// Registers `callback` for frames whose `type` equals `message_type`.
    ///
    /// Typed subscribers receive the frame's `data`; subscribers to
    /// [`WILDCARD`] receive the whole envelope instead.
    pub fn subscribe<F>(
        &self,
        message_type: &str,
        callback: F,
    ) -> Result<Subscription, ChannelError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_callback(message_type, Arc::new(callback))
    }

    /// Like [`ChannelClient::subscribe`], decoding the payload into `T`.
    ///
    /// Payloads that do not decode are logged and skipped for this
    /// subscriber.
    pub fn subscribe_as<T, F>(
        &self,
        message_type: &str,
        callback: F,
    ) -> Result<Subscription, ChannelError>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_callback(message_type, decoding(message_type, callback))
    }

    /// Receives every inbound envelope in full.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(WILDCARD, Arc::new(callback))
    }

    /// Receives every inbound envelope decoded into a tagged union, typically
    /// an enum with `#[serde(tag = "type", content = "data")]`.
    pub fn subscribe_all_as<M, F>(&self, callback: F) -> Subscription
    where
        M: DeserializeOwned,
        F: Fn(M) + Send + Sync + 'static,
    {
        self.inner
            .subscribers
            .subscribe(WILDCARD, decoding(WILDCARD, callback))
    }

    fn subscribe_callback(
        &self,
        message_type: &str,
        callback: Callback,
    ) -> Result<Subscription, ChannelError> {
        if message_type.is_empty() {
            return Err(ChannelError::InvalidSubscription);
        }
        Ok(self.inner.subscribers.subscribe(message_type, callback))
    }

    /// Number of live subscriptions for `message_type`.
    pub fn subscriber_count(&self, message_type: &str) -> usize {
        self.inner.subscribers.count(message_type)
    }

    /// Sends `{type, data}` if the channel is open; otherwise the message is
    /// dropped with a warning. Nothing is queued across reconnects.
    pub fn send(&self, message_type: &str, data: Option<Value>) {
        let state = self.inner.lock_state();
        let link = match (&state.connection, state.link.as_ref()) {
            (ConnectionState::Open, Some(link)) => link,
            (connection, _) => {
                warn!(
                    event = "send_dropped",
                    channel = %self.inner.name,
                    message_type,
                    state = ?connection
                );
                return;
            }
        };

        let text = match Envelope::new(message_type, data).to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    event = "send_encode_failed",
                    channel = %self.inner.name,
                    message_type,
                    error = %err
                );
                return;
            }
        };
        if link.outbound.send(text).is_err() {
            warn!(
                event = "send_dropped",
                channel = %self.inner.name,
                message_type,
                reason = "worker_stopped"
            );
        }
    }

    /// Serializes `data` and sends it like [`ChannelClient::send`].
    ///
    /// Only serialization failures are reported; a closed channel still
    /// drops silently.
    pub fn send_json<T>(&self, message_type: &str, data: &T) -> Result<(), ChannelError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(data)?;
        self.send(message_type, Some(value));
        Ok(())
    }

    /// True while the connection is `Open`.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock_state().connection
    }

    /// Reconnects scheduled since the last successful open.
    pub fn retry_count(&self) -> u32 {
        self.inner.lock_state().retry_count
    }
}

impl fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelClient")
            .field("name", &self.inner.name)
            .field("url", &self.inner.request.url)
            .field("state", &self.state())
            .finish()
    }
}

impl ChannelInner {
    fn lock_state(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_connecting(self: &Arc<Self>, state: &mut ChannelState) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(
                event = "connect_without_runtime",
                channel = %self.name,
                state = ?state.connection
            );
            return;
        };
        state.generation += 1;
        state.connection = ConnectionState::Connecting;
        let generation = state.generation;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let worker = runtime.spawn(connection_worker(
            Arc::downgrade(self),
            generation,
            outbound_rx,
        ));
        state.link = Some(Link {
            outbound: outbound_tx,
            worker,
        });

        debug!(
            event = "channel_connecting",
            channel = %self.name,
            generation,
            retry_count = state.retry_count
        );
    }

    /// Moves a still-current attempt to `Open`.
    fn mark_open(&self, generation: u64) -> bool {
        let mut state = self.lock_state();
        if state.generation != generation || state.link.is_none() {
            return false;
        }
        state.connection = ConnectionState::Open;
        state.retry_count = 0;
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.lock_state();
        state.generation == generation && state.connection == ConnectionState::Open
    }

    fn dispatch(&self, generation: u64, text: &str) {
        let _gate = self.gate.enter();
        if !self.is_current(generation) {
            return;
        }

        let frame = match InboundFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    event = "frame_dropped",
                    channel = %self.name,
                    error = %err,
                    len = text.len()
                );
                return;
            }
        };

        let snapshot = self.subscribers.snapshot(frame.message_type());
        let delivered = snapshot.deliver(&frame);
        if delivered == 0 {
            debug!(
                event = "frame_unhandled",
                channel = %self.name,
                message_type = frame.message_type().unwrap_or_default()
            );
        }
    }

    /// Close handler shared by failed opens and dropped connections.
    fn handle_closed(self: &Arc<Self>, generation: u64, error: Option<ChannelError>) {
        let _gate = self.gate.enter();
        let mut state = self.lock_state();
        if state.generation != generation || state.link.is_none() {
            return;
        }
        state.link = None;
        state.connection = ConnectionState::Closed;

        let mut exhausted = false;
        match state.policy.next_delay(state.retry_count) {
            Some(delay) => {
                state.retry_count += 1;
                self.schedule_reconnect(&mut state, delay);
            }
            None => exhausted = state.policy.enabled,
        }
        let retry_count = state.retry_count;
        let max_attempts = state.policy.max_attempts;
        drop(state);

        if let Some(err) = error.as_ref() {
            debug!(event = "channel_error", channel = %self.name, error = %err);
            self.hooks.fire_error(err);
        }
        debug!(event = "channel_closed", channel = %self.name, retry_count);
        self.hooks.fire_close();

        if exhausted {
            warn!(
                event = "reconnect_exhausted",
                channel = %self.name,
                retry_count,
                max_attempts
            );
            self.hooks.fire_reconnect_exhausted();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ChannelState, delay: Duration) {
        if let Some(previous) = state.reconnect_timer.take() {
            previous.abort();
        }

        let attempt = state.retry_count;
        debug!(
            event = "reconnect_scheduled",
            channel = %self.name,
            attempt,
            max_attempts = state.policy.max_attempts,
            delay_ms = delay.as_millis() as u64
        );

        let channel = Arc::downgrade(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(channel) = channel.upgrade() {
                channel.reconnect_due(attempt);
            }
        }));
    }

    /// Runs when a reconnect timer fires. The enabled flag is checked here
    /// because a disconnect may have raced the timer.
    fn reconnect_due(self: &Arc<Self>, attempt: u32) {
        let mut state = self.lock_state();
        state.reconnect_timer = None;
        if !state.policy.enabled {
            debug!(event = "reconnect_cancelled", channel = %self.name, attempt);
            return;
        }
        if matches!(
            state.connection,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }
        self.start_connecting(&mut state);
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(link) = state.link.take() {
            if state.connection == ConnectionState::Connecting {
                link.worker.abort();
            }
        }
    }
}

/// Owns one transport for its whole life. Holds only a weak reference to
/// the channel so dropped clients end the worker.
async fn connection_worker(
    channel: Weak<ChannelInner>,
    generation: u64,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
) {
    let (request, connector) = match channel.upgrade() {
        Some(inner) => (inner.request.clone(), Arc::clone(&inner.connector)),
        None => return,
    };

    let attempt = connector.connect(&request).await;
    let Some(inner) = channel.upgrade() else {
        return;
    };
    let Transport {
        mut sink,
        mut stream,
    } = match attempt {
        Ok(transport) => transport,
        Err(err) => {
            inner.handle_closed(generation, Some(err));
            return;
        }
    };

    let opened = {
        let _gate = inner.gate.enter();
        let opened = inner.mark_open(generation);
        if opened {
            debug!(event = "channel_open", channel = %inner.name, generation);
            inner.hooks.fire_open();
        }
        opened
    };
    drop(inner);
    if !opened {
        let _ = sink.close().await;
        return;
    }

    let error = loop {
        tokio::select! {
            maybe_outbound = outbound_rx.recv() => {
                match maybe_outbound {
                    Some(text) => {
                        if let Err(err) = sink.send(text).await {
                            break Some(err);
                        }
                    }
                    None => {
                        // Disconnected or every client handle dropped.
                        let _ = sink.close().await;
                        return;
                    }
                }
            }
            maybe_inbound = stream.next() => {
                match maybe_inbound {
                    Some(Ok(text)) => match channel.upgrade() {
                        Some(inner) => inner.dispatch(generation, &text),
                        None => return,
                    },
                    Some(Err(err)) => break Some(err),
                    None => break None,
                }
            }
        }
    };

    if let Some(inner) = channel.upgrade() {
        inner.handle_closed(generation, error);
    }
}
