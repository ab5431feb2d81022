//! Traits at the seams of the session core.
//!
//! The orchestrator drives a [`TaskEngine`] and a [`ControlChannel`] it does not
//! own; hosts plug in [`HostMetadata`] and [`EndpointResolver`] for startup
//! discovery, and register [`Plugin`]s with whatever engine they run.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use crate::{
    PluginContext,
    contracts::{DocumentResult, PluginOutput, StopType},
};

/// Stream of results published by a task engine.
///
/// The engine ends the stream exactly once, when it has fully stopped.
pub type ResultStream = BoxStream<'static, DocumentResult>;

/// Task engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine already started")]
    AlreadyStarted,
    #[error("Engine not started")]
    NotStarted,
    #[error("Engine is stopping")]
    Stopping,
    #[error("Engine error: {0}")]
    Internal(String),
}

/// Contract of the engine that executes dispatched documents.
#[async_trait]
pub trait TaskEngine: Send + Sync {
    /// Start the engine and hand back its result stream.
    async fn start(&self) -> Result<ResultStream, EngineError>;

    /// Load and replay work that was pending before start.
    async fn initial_processing(&self) -> Result<(), EngineError>;

    /// Stop the engine. The result stream ends once the stop completes.
    async fn stop(&self, stop_type: StopType);
}

/// Kind of message written to the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// Settings handed to a control channel at initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub instance_id: String,
    /// `https://` endpoint of the message gateway.
    pub endpoint: String,
}

/// Control channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Control channel not initialized")]
    NotInitialized,
    #[error("Control channel not open")]
    NotOpen,
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connect failed: {0}")]
    Connect(String),
    #[error("Send failed: {0}")]
    Send(String),
    #[error("Channel closed")]
    Closed,
}

/// Persistent channel to the message gateway.
///
/// Every operation is best effort from the orchestrator's point of view.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Record identity and endpoint. Called once before anything else.
    async fn initialize(&self, config: ChannelConfig);

    /// Prepare the underlying transport.
    async fn attach_transport(&self) -> Result<(), ChannelError>;

    /// Open the channel.
    async fn open(&self) -> Result<(), ChannelError>;

    /// Close the channel.
    async fn close(&self) -> Result<(), ChannelError>;

    /// Send one complete frame.
    async fn send(&self, data: Bytes, kind: FrameKind) -> Result<(), ChannelError>;
}

/// Host metadata error.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata unavailable: {0}")]
    Unavailable(String),
}

/// Source of host identity and region, consulted once at construction.
pub trait HostMetadata: Send + Sync {
    /// Identity of this host.
    ///
    /// # Errors
    /// Returns error if the identity cannot be determined.
    fn instance_id(&self) -> Result<String, MetadataError>;

    /// Region this host runs in.
    ///
    /// # Errors
    /// Returns error if the region cannot be determined.
    fn region(&self) -> Result<String, MetadataError>;
}

/// Maps a region to the gateway hostname.
pub trait EndpointResolver: Send + Sync {
    /// Hostname for `region`, or `None` when the region is unknown.
    fn resolve(&self, region: &str) -> Option<String>;
}

/// A module registered with the host's module registry.
#[async_trait]
pub trait CoreModule: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Static registration name.
    fn name(&self) -> &'static str;

    /// Start the module. Returns once startup is done.
    async fn execute(&self) -> Result<(), Self::Error>;

    /// Ask the module to stop.
    async fn request_stop(&self, stop_type: StopType) -> Result<(), Self::Error>;
}

/// One executable step kind within a document.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Registered name, e.g. `aws:runShellScript`.
    fn name(&self) -> &str;

    /// Run the step. Failures are reported through the output status.
    async fn execute(&self, ctx: &PluginContext, input: &Value) -> PluginOutput;
}
