//! Wire protocol for the control channel.
//!
//! Every frame is a fixed-width big-endian header followed by the payload:
//!
//! ```text
//! ┌────────┬──────┬──────────────────────────────────────────────┐
//! │ offset │ size │ field                                        │
//! ├────────┼──────┼──────────────────────────────────────────────┤
//! │      0 │    4 │ header length (u32), always 112              │
//! │      4 │   32 │ message type, ASCII, space padded            │
//! │     36 │    4 │ schema version (u32)                         │
//! │     40 │    8 │ created date, epoch millis (u64)             │
//! │     48 │    8 │ sequence number (i64)                        │
//! │     56 │    8 │ flags (u64)                                  │
//! │     64 │   16 │ message id, low 8 bytes then high 8 bytes    │
//! │     80 │   32 │ SHA-256 digest of the payload                │
//! │    112 │    4 │ payload length (u32)                         │
//! │    116 │    N │ payload                                      │
//! └────────┴──────┴──────────────────────────────────────────────┘
//! ```

use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

/// Protocol schema version stamped on new frames and payloads.
pub const SCHEMA_VERSION: u32 = 1;

const MESSAGE_TYPE_LENGTH: usize = 32;
const DIGEST_LENGTH: usize = 32;

/// Value of the header-length field: the offset of the payload length.
pub const HEADER_LENGTH: u32 = 112;

/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = HEADER_LENGTH as usize + 4;

/// Protocol error.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Frame truncated: need at least {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("Unexpected header length {0}")]
    HeaderLength(u32),
    #[error("Unknown message type: {0:?}")]
    UnknownMessageType(String),
    #[error("Payload length mismatch: header says {declared}, frame carries {actual}")]
    PayloadLength { declared: usize, actual: usize },
    #[error("Payload digest mismatch")]
    DigestMismatch,
    #[error("Payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Expected {expected} payload, frame is {actual}")]
    WrongMessageType {
        expected: MessageType,
        actual: MessageType,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frame tag. Determines the payload schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Completion report for one plugin step ([`TaskCompletePayload`]).
    TaskComplete,
    TaskReply,
    Acknowledge,
    ChannelClosed,
    OutputStreamData,
    InputStreamData,
    InteractiveShell,
}

impl MessageType {
    /// Wire name of the tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskComplete => "agent_task_complete",
            Self::TaskReply => "agent_task_reply",
            Self::Acknowledge => "acknowledge",
            Self::ChannelClosed => "channel_closed",
            Self::OutputStreamData => "output_stream_data",
            Self::InputStreamData => "input_stream_data",
            Self::InteractiveShell => "interactive_shell",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "agent_task_complete" => Self::TaskComplete,
            "agent_task_reply" => Self::TaskReply,
            "acknowledge" => Self::Acknowledge,
            "channel_closed" => Self::ChannelClosed,
            "output_stream_data" => Self::OutputStreamData,
            "input_stream_data" => Self::InputStreamData,
            "interactive_shell" => Self::InteractiveShell,
            other => return Err(ProtocolError::UnknownMessageType(other.to_string())),
        })
    }
}

/// Payload of an `agent_task_complete` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskCompletePayload {
    pub schema_version: u32,
    pub task_id: String,
    pub topic: String,
    pub final_task_status: String,
    pub is_routing_failure: bool,
    #[serde(rename = "AwsAccountId")]
    pub account_id: String,
    pub instance_id: String,
    pub output: String,
}

/// One frame on the control channel.
///
/// The payload digest is derived on encode and checked on decode, so it is
/// not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMessage {
    pub message_type: MessageType,
    pub schema_version: u32,
    /// Epoch milliseconds.
    pub created_date: u64,
    /// Reserved; always zero for now.
    pub sequence_number: i64,
    /// Reserved; always zero for now.
    pub flags: u64,
    pub message_id: Uuid,
    pub payload: Bytes,
}

/// Generate a fresh message id.
///
/// Random v4 UUID from the OS RNG; safe to call from any thread.
#[must_use]
pub fn new_message_id() -> Uuid {
    Uuid::new_v4()
}

/// Current time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

impl AgentMessage {
    /// Create a frame with a fresh id, the current time and the current schema.
    ///
    /// The caller guarantees `payload` encodes the shape of `message_type`;
    /// outside this crate frames are built through the typed constructors.
    #[must_use]
    pub(crate) fn new(message_type: MessageType, payload: Bytes) -> Self {
        Self {
            message_type,
            schema_version: SCHEMA_VERSION,
            created_date: now_millis(),
            sequence_number: 0,
            flags: 0,
            message_id: new_message_id(),
            payload,
        }
    }

    /// Create an `agent_task_complete` frame carrying `payload`.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn task_complete(payload: &TaskCompletePayload) -> Result<Self, ProtocolError> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::new(MessageType::TaskComplete, Bytes::from(bytes)))
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    /// Returns error if the payload is not valid JSON for `T`.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode the payload of an `agent_task_complete` frame.
    ///
    /// # Errors
    /// Returns error if the frame has another type or the payload is invalid.
    pub fn task_complete_payload(&self) -> Result<TaskCompletePayload, ProtocolError> {
        if self.message_type != MessageType::TaskComplete {
            return Err(ProtocolError::WrongMessageType {
                expected: MessageType::TaskComplete,
                actual: self.message_type,
            });
        }
        self.decode_payload()
    }

    /// Encode the frame.
    ///
    /// # Errors
    /// Returns error if the payload does not fit a u32 length.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let payload_length = u32::try_from(self.payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = BytesMut::with_capacity(PAYLOAD_OFFSET + self.payload.len());
        buf.put_u32(HEADER_LENGTH);

        let mut message_type = [b' '; MESSAGE_TYPE_LENGTH];
        let name = self.message_type.as_str().as_bytes();
        message_type[..name.len()].copy_from_slice(name);
        buf.put_slice(&message_type);

        buf.put_u32(self.schema_version);
        buf.put_u64(self.created_date);
        buf.put_i64(self.sequence_number);
        buf.put_u64(self.flags);

        let id = self.message_id.as_bytes();
        buf.put_slice(&id[8..]);
        buf.put_slice(&id[..8]);

        buf.put_slice(&Sha256::digest(&self.payload));
        buf.put_u32(payload_length);
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode a frame.
    ///
    /// # Errors
    /// Returns error if the frame is truncated, malformed, or fails its digest.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < PAYLOAD_OFFSET {
            return Err(ProtocolError::Truncated {
                needed: PAYLOAD_OFFSET,
                actual: data.len(),
            });
        }

        let mut buf = data;
        let header_length = buf.get_u32();
        if header_length != HEADER_LENGTH {
            return Err(ProtocolError::HeaderLength(header_length));
        }

        let mut raw_type = [0u8; MESSAGE_TYPE_LENGTH];
        buf.copy_to_slice(&mut raw_type);
        let name = String::from_utf8_lossy(&raw_type);
        let message_type: MessageType = name.trim_end_matches([' ', '\0']).parse()?;

        let schema_version = buf.get_u32();
        let created_date = buf.get_u64();
        let sequence_number = buf.get_i64();
        let flags = buf.get_u64();

        let mut raw_id = [0u8; 16];
        buf.copy_to_slice(&mut raw_id);
        let mut id = [0u8; 16];
        id[..8].copy_from_slice(&raw_id[8..]);
        id[8..].copy_from_slice(&raw_id[..8]);

        let mut digest = [0u8; DIGEST_LENGTH];
        buf.copy_to_slice(&mut digest);

        let declared = buf.get_u32() as usize;
        if declared != buf.remaining() {
            return Err(ProtocolError::PayloadLength {
                declared,
                actual: buf.remaining(),
            });
        }
        let payload = Bytes::copy_from_slice(buf);
        if Sha256::digest(&payload).as_slice() != digest {
            return Err(ProtocolError::DigestMismatch);
        }

        Ok(Self {
            message_type,
            schema_version,
            created_date,
            sequence_number,
            flags,
            message_id: Uuid::from_bytes(id),
            payload,
        })
    }
}
