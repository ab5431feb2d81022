//! Message gateway agent host.
//!
//! Run with: cargo run -p agent-host -- [config.json]
//!
//! Identity, region and endpoint come from the config file or the
//! `MGS_INSTANCE_ID`, `MGS_REGION` and `MGS_ENDPOINT` environment variables.
//! Set `MGS_LOOPBACK=1` to run without a gateway: replies are printed instead
//! of sent, and a sample shell document is submitted at startup.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use mgs_agent_core::{
    AppConfig, ControlChannel, CoreModule, Document, HostMetadata, PluginStep,
    StaticEndpointResolver, StaticHostMetadata, StopType,
};
use mgs_agent_executor::{
    DomainJoinArguments, DomainJoinPlugin, OutputLimits, ProcessRunner, ShellScriptPlugin,
};
use mgs_agent_session::{LocalEngine, Session};
use mgs_agent_transport::{LoopbackChannel, LoopbackPeer, WebSocketControlChannel};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "mgs-agent.json";
const ENV_LOOPBACK: &str = "MGS_LOOPBACK";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG), PathBuf::from);
    let mut config = AppConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.apply_env_overrides();

    let loopback = std::env::var(ENV_LOOPBACK).is_ok_and(|v| v == "1");
    let metadata = if loopback {
        StaticHostMetadata::new(Some("i-loopback".into()), Some("us-east-1".into()))
    } else {
        StaticHostMetadata::new(None, None)
    };

    let region = if config.mgs.region.is_empty() {
        metadata.region().unwrap_or_default()
    } else {
        config.mgs.region.clone()
    };
    let limits = OutputLimits::from(&config.plugins);
    let engine = Arc::new(
        LocalEngine::new(config.mgs.session_workers_limit)
            .with_working_dir(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .with_plugin(Arc::new(ShellScriptPlugin::new(ProcessRunner, limits.clone())))
            .with_plugin(Arc::new(DomainJoinPlugin::new(
                ProcessRunner,
                DomainJoinArguments::new(region),
                limits,
            ))),
    );

    let (channel, peer): (Arc<dyn ControlChannel>, Option<LoopbackPeer>) = if loopback {
        let (channel, peer) = LoopbackChannel::new();
        (Arc::new(channel), Some(peer))
    } else {
        (Arc::new(WebSocketControlChannel::new()), None)
    };

    let Ok(session) = Session::new(
        &config,
        &metadata,
        &StaticEndpointResolver::new(),
        engine.clone(),
        channel,
    ) else {
        tracing::warn!("Session module not available; exiting");
        return Ok(());
    };
    tracing::info!(
        module = session.name(),
        instance_id = session.instance_id(),
        endpoint = session.endpoint(),
        "Session module created"
    );

    if let Some(peer) = peer {
        tokio::spawn(print_replies(peer));
        engine.submit(sample_document())?;
    }

    if let Err(e) = session.execute().await {
        tracing::error!(error = %e, "Session failed to start");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutting down");
    session.request_stop(StopType::Soft).await?;

    Ok(())
}

async fn print_replies(mut peer: LoopbackPeer) {
    while let Some(frame) = peer.recv().await {
        match frame.decode().and_then(|m| m.task_complete_payload()) {
            Ok(payload) => tracing::info!(
                task_id = %payload.task_id,
                status = %payload.final_task_status,
                output = %payload.output,
                "Reply"
            ),
            Err(e) => tracing::warn!(error = %e, "Undecodable reply frame"),
        }
    }
}

fn sample_document() -> Document {
    Document {
        message_id: "loopback-1".into(),
        document_name: "AWS-RunShellScript".into(),
        steps: vec![PluginStep {
            id: "runShellScript".into(),
            name: mgs_agent_executor::shell::PLUGIN_NAME.into(),
            inputs: serde_json::json!({ "runCommand": ["echo hello from the agent", "uname -a"] }),
        }],
    }
}
