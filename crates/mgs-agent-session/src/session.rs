//! Message gateway session orchestrator.
//!
//! Wires the task engine's result stream to the control channel. Startup
//! discovers identity, region and endpoint, starts the engine, launches the
//! reply pipeline and opens the control channel. Stop closes the channel,
//! stops the engine and waits a bounded time for the pipeline to drain.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use mgs_agent_core::{
    AgentInfo, AppConfig, ChannelConfig, ControlChannel, CoreModule, EndpointResolver,
    EngineError, HostMetadata, StopType, TaskEngine, gateway_endpoint,
};
use tokio::task::JoinError;
use tracing::Instrument;

use crate::{
    fault::supervise,
    reply::{ReplyHandle, spawn_reply_pipeline},
};

/// Registration name of the session module.
pub const SESSION_SERVICE_NAME: &str = "MessageGatewayService";

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("No instance id: {0}")]
    Identity(String),
    #[error("Failed to get region: {0}")]
    Region(String),
    #[error("No gateway endpoint for region {0}")]
    Endpoint(String),
    #[error("Unable to start task engine: {0}")]
    EngineStart(#[source] EngineError),
    #[error("Initial processing failed: {0}")]
    InitialProcessing(#[source] EngineError),
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session fault: {0}")]
    Fault(String),
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    /// Startup claimed; the engine is not running yet.
    Starting,
    Running,
    Stopping,
    Stopped,
}

struct Inner {
    agent_info: AgentInfo,
    instance_id: String,
    region: String,
    endpoint: String,
    stop_timeout: Duration,
    engine: Arc<dyn TaskEngine>,
    channel: Arc<dyn ControlChannel>,
    state: Mutex<SessionState>,
    reply: tokio::sync::Mutex<Option<ReplyHandle>>,
    /// Held while the control channel is set up or closed.
    channel_setup: tokio::sync::Mutex<()>,
}

/// The session core module.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    /// Build a session, resolving identity, region and endpoint.
    ///
    /// Values set in `config` win over discovery. Every failure is logged
    /// before it is returned; the host treats an error as "no module".
    ///
    /// # Errors
    /// Returns error if the instance id, region or endpoint is unavailable.
    pub fn new(
        config: &AppConfig,
        metadata: &dyn HostMetadata,
        resolver: &dyn EndpointResolver,
        engine: Arc<dyn TaskEngine>,
        channel: Arc<dyn ControlChannel>,
    ) -> Result<Self, SessionError> {
        let instance_id = configured_or(&config.mgs.instance_id, || metadata.instance_id())
            .map_err(|e| {
                tracing::error!(error = %e, "No instance id provided");
                SessionError::Identity(e)
            })?;

        let region = configured_or(&config.mgs.region, || metadata.region()).map_err(|e| {
            tracing::error!(error = %e, "Failed to get region");
            SessionError::Region(e)
        })?;

        let endpoint = if config.mgs.endpoint.is_empty() {
            gateway_endpoint(resolver, &region).ok_or_else(|| {
                tracing::error!(%region, "Failed to resolve gateway endpoint");
                SessionError::Endpoint(region.clone())
            })?
        } else {
            config.mgs.endpoint.clone()
        };

        tracing::debug!(%instance_id, %region, %endpoint, "Session configured");

        Ok(Self {
            inner: Arc::new(Inner {
                agent_info: AgentInfo::from_config(config),
                instance_id,
                region,
                endpoint,
                stop_timeout: config.mgs.stop_timeout(),
                engine,
                channel,
                state: Mutex::new(SessionState::Uninitialized),
                reply: tokio::sync::Mutex::new(None),
                channel_setup: tokio::sync::Mutex::new(()),
            }),
        })
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    #[must_use]
    pub fn region(&self) -> &str {
        &self.inner.region
    }

    /// Gateway endpoint, `https://` prefixed.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    #[must_use]
    pub fn agent_info(&self) -> &AgentInfo {
        &self.inner.agent_info
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.state()
    }
}

fn configured_or<F, E>(configured: &str, discover: F) -> Result<String, String>
where
    F: FnOnce() -> Result<String, E>,
    E: std::fmt::Display,
{
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }
    match discover() {
        Ok(value) if !value.is_empty() => Ok(value),
        Ok(_) => Err("empty value".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: SessionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
    }

    /// Move from `from` to `to`; false if the state is no longer `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != from {
            return false;
        }
        *state = to;
        true
    }

    async fn start(&self) -> Result<(), SessionError> {
        if !self.transition(SessionState::Uninitialized, SessionState::Starting) {
            return Err(SessionError::AlreadyStarted);
        }

        tracing::info!("Starting session document processing engine");
        let results = match self.engine.start().await {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "Unable to start session document processor");
                self.transition(SessionState::Starting, SessionState::Uninitialized);
                return Err(SessionError::EngineStart(e));
            }
        };

        if !self.transition(SessionState::Starting, SessionState::Running) {
            tracing::info!("Stop requested while the engine was starting");
            self.engine.stop(StopType::Hard).await;
            return Ok(());
        }

        tracing::info!("Launching reply pipeline");
        let reply = spawn_reply_pipeline(results, Arc::clone(&self.channel), self.instance_id.clone());
        *self.reply.lock().await = Some(reply);

        self.engine.initial_processing().await.map_err(|e| {
            tracing::error!(error = %e, "Initial processing of pending documents failed");
            SessionError::InitialProcessing(e)
        })?;

        let _setup = self.channel_setup.lock().await;
        if self.state() != SessionState::Running {
            tracing::info!("Session is stopping; skipping control channel setup");
            return Ok(());
        }
        self.channel
            .initialize(ChannelConfig {
                instance_id: self.instance_id.clone(),
                endpoint: self.endpoint.clone(),
            })
            .await;
        if let Err(e) = self.channel.attach_transport().await {
            tracing::error!(error = %e, "Failed to attach transport to control channel");
        }
        if let Err(e) = self.channel.open().await {
            tracing::error!(error = %e, "Failed to open control channel");
        }

        tracing::info!("Receiving messages from control channel");
        Ok(())
    }

    async fn stop(&self, stop_type: StopType) {
        tracing::info!(?stop_type, "Stopping {SESSION_SERVICE_NAME}");
        self.set_state(SessionState::Stopping);

        {
            let _setup = self.channel_setup.lock().await;
            if let Err(e) = self.channel.close().await {
                tracing::error!(error = %e, "Stopping control channel with error");
            }
        }

        self.engine.stop(stop_type).await;

        let reply = self.reply.lock().await.take();
        if let Some(reply) = reply {
            let (mut join, cancel) = reply.into_parts();
            match tokio::time::timeout(self.stop_timeout, &mut join).await {
                Ok(joined) => log_reply_exit(joined),
                Err(_) => {
                    tracing::warn!(
                        timeout = ?self.stop_timeout,
                        "Reply pipeline did not drain in time; cancelling"
                    );
                    let _ = cancel.send(());
                    log_reply_exit(join.await);
                }
            }
        }

        self.set_state(SessionState::Stopped);
        tracing::info!("{SESSION_SERVICE_NAME} stopped");
    }
}

fn log_reply_exit(joined: Result<crate::reply::ReplyStats, JoinError>) {
    match joined {
        Ok(stats) => tracing::info!(
            sent = stats.sent,
            skipped = stats.skipped,
            failed = stats.failed,
            "Reply pipeline stopped"
        ),
        Err(e) => tracing::error!(error = %e, "Reply pipeline ended abnormally"),
    }
}

#[async_trait]
impl CoreModule for Session {
    type Error = SessionError;

    fn name(&self) -> &'static str {
        SESSION_SERVICE_NAME
    }

    /// Run startup on a supervised task. A panic during startup is logged
    /// with the backtrace of the panic site and reported as
    /// [`SessionError::Fault`] instead of reaching the host.
    async fn execute(&self) -> Result<(), SessionError> {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("session", instance_id = %inner.instance_id);

        match supervise(async move { inner.start().await }.instrument(span)).await {
            Ok(result) => result,
            Err(fault) => {
                let backtrace = fault.backtrace.as_deref().unwrap_or("<not captured>");
                tracing::error!(fault = %fault.message, %backtrace, "Session startup panicked");
                self.inner
                    .transition(SessionState::Starting, SessionState::Uninitialized);
                Err(SessionError::Fault(fault.message))
            }
        }
    }

    /// Close the channel, stop the engine and drain the reply pipeline.
    ///
    /// Safe to call before `execute`. Component failures are logged, never
    /// returned.
    async fn request_stop(&self, stop_type: StopType) -> Result<(), SessionError> {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("session", instance_id = %inner.instance_id);
        inner.stop(stop_type).instrument(span).await;
        Ok(())
    }
}
