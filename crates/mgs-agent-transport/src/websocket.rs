//! WebSocket control channel to the message gateway.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use mgs_agent_core::{ChannelConfig, ChannelError, ControlChannel, FrameKind};
use tokio::{net::TcpStream, sync::Mutex, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::protocol::AgentMessage;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Path of the control channel below the gateway endpoint.
const CONTROL_CHANNEL_PATH: &str = "/v1/control-channel/";

/// Build the control channel URL for `instance_id` from a gateway endpoint.
///
/// `https://` maps to `wss://` and `http://` to `ws://`; WebSocket URLs are
/// kept as they are.
///
/// # Errors
/// Returns error if the endpoint has no supported scheme or no host.
pub fn control_channel_url(endpoint: &str, instance_id: &str) -> Result<String, ChannelError> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let (scheme, rest) = endpoint
        .split_once("://")
        .ok_or_else(|| ChannelError::InvalidEndpoint(endpoint.to_string()))?;
    let ws_scheme = match scheme {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return Err(ChannelError::InvalidEndpoint(endpoint.to_string())),
    };
    if rest.is_empty() {
        return Err(ChannelError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(format!("{ws_scheme}://{rest}{CONTROL_CHANNEL_PATH}{instance_id}"))
}

#[derive(Default)]
struct Inner {
    config: Option<ChannelConfig>,
    url: Option<String>,
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
}

/// Control channel over a single WebSocket connection.
///
/// Writes are serialized behind one lock, so frames never interleave.
/// Reconnection is left to the caller.
#[derive(Default)]
pub struct WebSocketControlChannel {
    inner: Mutex<Inner>,
}

impl WebSocketControlChannel {
    /// Create an uninitialized channel.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// URL prepared by `attach_transport`.
    pub async fn url(&self) -> Option<String> {
        self.inner.lock().await.url.clone()
    }

    async fn read_loop<S>(mut reader: S)
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Binary(data)) => match AgentMessage::decode(&data) {
                    Ok(frame) => tracing::debug!(
                        message_type = %frame.message_type,
                        message_id = %frame.message_id,
                        "Received frame from gateway"
                    ),
                    Err(e) => tracing::warn!("Invalid frame from gateway: {e}"),
                },
                Ok(Message::Close(_)) => {
                    tracing::info!("Gateway closed the control channel");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("Control channel read error: {e}");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ControlChannel for WebSocketControlChannel {
    async fn initialize(&self, config: ChannelConfig) {
        tracing::info!(instance_id = %config.instance_id, endpoint = %config.endpoint, "Initializing control channel");
        self.inner.lock().await.config = Some(config);
    }

    async fn attach_transport(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let config = inner.config.as_ref().ok_or(ChannelError::NotInitialized)?;
        let url = control_channel_url(&config.endpoint, &config.instance_id)?;
        inner.url = Some(url);
        Ok(())
    }

    async fn open(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let url = inner.url.clone().ok_or(ChannelError::NotInitialized)?;

        tracing::info!(url = %url, "Opening control channel");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (sink, reader) = ws_stream.split();

        if let Some(old) = inner.reader.take() {
            old.abort();
        }
        inner.sink = Some(sink);
        inner.reader = Some(tokio::spawn(Self::read_loop(reader)));
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let reader = inner.reader.take();
        let Some(mut sink) = inner.sink.take() else {
            return Err(ChannelError::NotOpen);
        };

        let result = sink
            .close()
            .await
            .map_err(|e| ChannelError::Send(e.to_string()));
        if let Some(reader) = reader {
            reader.abort();
        }
        tracing::info!("Control channel closed");
        result
    }

    async fn send(&self, data: Bytes, kind: FrameKind) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().await;
        let sink = inner.sink.as_mut().ok_or(ChannelError::NotOpen)?;

        let message = match kind {
            FrameKind::Binary => Message::Binary(data.to_vec()),
            FrameKind::Text => Message::Text(
                String::from_utf8(data.to_vec()).map_err(|e| ChannelError::Send(e.to_string()))?,
            ),
        };
        sink.send(message)
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}
