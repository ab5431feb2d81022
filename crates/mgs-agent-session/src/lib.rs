//! Session orchestration for the message gateway agent.
//!
//! Provides:
//! - `Session` - The core module wiring the task engine to the control channel
//! - `spawn_reply_pipeline` - Result stream to `agent_task_complete` frames
//! - `build_task_complete_payload` - Reply payload assembly
//! - `LocalEngine` - In-process task engine

pub mod engine;
mod fault;
pub mod payload;
pub mod reply;
pub mod session;

#[cfg(test)]
mod test_support;

pub use engine::LocalEngine;
pub use payload::build_task_complete_payload;
pub use reply::{ReplyHandle, ReplyStats, spawn_reply_pipeline};
pub use session::{SESSION_SERVICE_NAME, Session, SessionError, SessionState};
