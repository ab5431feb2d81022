//! In-process control channel bridge.
//!
//! Frames sent on the channel side arrive on the peer side unchanged. Useful
//! for running the agent without a gateway and for tests.

use async_trait::async_trait;
use bytes::Bytes;
use mgs_agent_core::{ChannelConfig, ChannelError, ControlChannel, FrameKind};
use tokio::sync::{Mutex, mpsc};

use crate::protocol::{AgentMessage, ProtocolError};

/// One frame as it was handed to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub data: Bytes,
    pub kind: FrameKind,
}

impl SentFrame {
    /// Decode the frame bytes.
    ///
    /// # Errors
    /// Returns error if the bytes are not a valid frame.
    pub fn decode(&self) -> Result<AgentMessage, ProtocolError> {
        AgentMessage::decode(&self.data)
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    config: Option<ChannelConfig>,
    attached: bool,
    open: bool,
}

/// Channel side of the loopback bridge.
pub struct LoopbackChannel {
    state: Mutex<LoopbackState>,
    frame_tx: mpsc::UnboundedSender<SentFrame>,
}

impl LoopbackChannel {
    /// Create a new loopback bridge.
    ///
    /// Returns the channel and the peer that receives its frames.
    #[must_use]
    pub fn new() -> (Self, LoopbackPeer) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let channel = Self {
            state: Mutex::new(LoopbackState::default()),
            frame_tx,
        };

        (channel, LoopbackPeer { frame_rx })
    }

    /// Configuration recorded by `initialize`.
    pub async fn config(&self) -> Option<ChannelConfig> {
        self.state.lock().await.config.clone()
    }

    /// Whether the channel is currently open.
    pub async fn is_open(&self) -> bool {
        self.state.lock().await.open
    }
}

#[async_trait]
impl ControlChannel for LoopbackChannel {
    async fn initialize(&self, config: ChannelConfig) {
        tracing::debug!(instance_id = %config.instance_id, "Loopback channel initialized");
        self.state.lock().await.config = Some(config);
    }

    async fn attach_transport(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if state.config.is_none() {
            return Err(ChannelError::NotInitialized);
        }
        state.attached = true;
        Ok(())
    }

    async fn open(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if !state.attached {
            return Err(ChannelError::NotInitialized);
        }
        if self.frame_tx.is_closed() {
            return Err(ChannelError::Connect("loopback peer dropped".to_string()));
        }
        state.open = true;
        Ok(())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let mut state = self.state.lock().await;
        if !state.open {
            return Err(ChannelError::NotOpen);
        }
        state.open = false;
        Ok(())
    }

    async fn send(&self, data: Bytes, kind: FrameKind) -> Result<(), ChannelError> {
        if !self.state.lock().await.open {
            return Err(ChannelError::NotOpen);
        }
        self.frame_tx
            .send(SentFrame { data, kind })
            .map_err(|_| ChannelError::Closed)
    }
}

/// Peer side of the loopback bridge.
pub struct LoopbackPeer {
    frame_rx: mpsc::UnboundedReceiver<SentFrame>,
}

impl LoopbackPeer {
    /// Receive the next frame.
    pub async fn recv(&mut self) -> Option<SentFrame> {
        self.frame_rx.recv().await
    }

    /// Receive a frame (non-blocking).
    pub fn try_recv(&mut self) -> Option<SentFrame> {
        self.frame_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::protocol::MessageType;

    fn config() -> ChannelConfig {
        ChannelConfig {
            instance_id: "i-12345678".into(),
            endpoint: "https://gateway.local".into(),
        }
    }

    #[tokio::test]
    async fn test_frames_reach_peer_in_order() {
        let (channel, mut peer) = LoopbackChannel::new();
        channel.initialize(config()).await;
        assert_ok!(channel.attach_transport().await);
        assert_ok!(channel.open().await);

        for kind in [MessageType::Acknowledge, MessageType::TaskComplete] {
            let frame = AgentMessage::new(kind, Bytes::from_static(b"{}"));
            assert_ok!(
                channel
                    .send(frame.encode().unwrap(), FrameKind::Binary)
                    .await
            );
        }

        let first = peer.recv().await.unwrap();
        assert_eq!(first.kind, FrameKind::Binary);
        assert_eq!(first.decode().unwrap().message_type, MessageType::Acknowledge);
        let second = peer.recv().await.unwrap();
        assert_eq!(second.decode().unwrap().message_type, MessageType::TaskComplete);
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (channel, _peer) = LoopbackChannel::new();
        let result = channel.send(Bytes::new(), FrameKind::Binary).await;
        assert!(matches!(result, Err(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_open_requires_attach() {
        let (channel, _peer) = LoopbackChannel::new();
        assert!(matches!(
            channel.attach_transport().await,
            Err(ChannelError::NotInitialized)
        ));
        channel.initialize(config()).await;
        assert!(matches!(channel.open().await, Err(ChannelError::NotInitialized)));
        assert_eq!(channel.config().await, Some(config()));
    }

    #[tokio::test]
    async fn test_close_stops_sending() {
        let (channel, _peer) = LoopbackChannel::new();
        channel.initialize(config()).await;
        assert_ok!(channel.attach_transport().await);
        assert_ok!(channel.open().await);
        assert_ok!(channel.close().await);
        assert!(!channel.is_open().await);
        assert!(matches!(
            channel.send(Bytes::new(), FrameKind::Text).await,
            Err(ChannelError::NotOpen)
        ));
        assert!(matches!(channel.close().await, Err(ChannelError::NotOpen)));
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_send() {
        let (channel, peer) = LoopbackChannel::new();
        channel.initialize(config()).await;
        assert_ok!(channel.attach_transport().await);
        assert_ok!(channel.open().await);
        drop(peer);
        assert!(matches!(
            channel.send(Bytes::new(), FrameKind::Binary).await,
            Err(ChannelError::Closed)
        ));
    }
}
