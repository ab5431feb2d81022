//! Core abstractions for the message gateway session agent.
//!
//! This crate provides the fundamental building blocks:
//! - Work-item contracts (`DocumentResult`, `PluginResult`, `StopType`)
//! - `AppConfig` - Host-level configuration
//! - `PluginContext` / `AgentInfo` - Execution contexts
//! - Traits for the task engine, control channel, plugins and host discovery

pub mod config;
pub mod context;
pub mod contracts;
pub mod host;
pub mod traits;

pub use config::{AppConfig, ConfigError};
pub use context::{AgentInfo, PluginContext};
pub use contracts::{
    Document, DocumentResult, PluginOutput, PluginResult, PluginStep, ResultStatus, StopType,
};
pub use host::{StaticEndpointResolver, StaticHostMetadata, gateway_endpoint};
pub use traits::{
    ChannelConfig, ChannelError, ControlChannel, CoreModule, EndpointResolver, EngineError,
    FrameKind, HostMetadata, MetadataError, Plugin, ResultStream, TaskEngine,
};
