//! Transport seam between a channel and the wire.
//!
//! A [`Connector`] opens one bidirectional text-frame transport per connect
//! attempt. [`WebSocketConnector`] is the production implementation; tests
//! substitute in-memory connectors.

use std::fmt;
use std::pin::Pin;

use futures_util::future::{self, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{Sink, SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::channel::client::ChannelError;

/// Outbound half of an open transport. Accepts encoded text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Inbound half of an open transport. Ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// An open transport handed to the channel worker.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Everything a connector needs to open a channel transport.
#[derive(Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub api_key: Option<SecretString>,
}

impl ConnectRequest {
    /// Builds the websocket upgrade request, attaching `x-api-key` when an
    /// API key is configured.
    pub fn client_request(&self) -> Result<Request, ChannelError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(api_key) = self.api_key.as_ref() {
            let header: HeaderValue = api_key.expose_secret().parse()?;
            request.headers_mut().insert("x-api-key", header);
        }
        Ok(request)
    }
}

impl fmt::Debug for ConnectRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectRequest")
            .field("url", &self.url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Opens transports for a channel.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> BoxFuture<'static, Result<Transport, ChannelError>>;
}

/// Websocket connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> BoxFuture<'static, Result<Transport, ChannelError>> {
        let request = request.clone();
        Box::pin(async move {
            let upgrade = request.client_request()?;
            let (socket, response) = connect_async(upgrade).await?;
            debug!(
                event = "websocket_upgraded",
                url = %request.url,
                status = response.status().as_u16()
            );

            let (sink, stream) = socket.split();
            let sink = sink
                .sink_map_err(ChannelError::from)
                .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));
            let stream = stream.filter_map(|item| future::ready(text_frame(item)));

            Ok(Transport {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        })
    }
}

fn text_frame(
    item: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<String, ChannelError>> {
    match item {
        Ok(Message::Text(text)) => Some(Ok(text)),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(Ok(text)),
            Err(_) => {
                warn!(event = "binary_frame_dropped", reason = "not_utf8");
                None
            }
        },
        // Pings are answered by tungstenite while the stream is polled.
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => None,
        Ok(Message::Close(frame)) => {
            debug!(event = "websocket_close_frame", frame = ?frame);
            None
        }
        Err(err) => Some(Err(ChannelError::WebSocket(err))),
    }
}
