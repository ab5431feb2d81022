//! Wire protocol and control channels for the message gateway.
//!
//! Provides:
//! - Binary frame codec and task-complete payload
//! - Loopback control channel (in-process bridge)
//! - WebSocket control channel (feature: websocket)

pub mod loopback;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use loopback::{LoopbackChannel, LoopbackPeer, SentFrame};
pub use protocol::{AgentMessage, MessageType, ProtocolError, TaskCompletePayload};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketControlChannel;
