//! Reply pipeline.
//!
//! Drains the engine's result stream and turns every per-step result into an
//! `agent_task_complete` frame on the control channel. Aggregate results are
//! skipped. The pipeline runs as its own task and ends when the stream ends or
//! when it is cancelled.

use std::sync::Arc;

use futures::StreamExt;
use mgs_agent_core::{ControlChannel, DocumentResult, FrameKind, ResultStream};
use mgs_agent_transport::{AgentMessage, MessageType, ProtocolError};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::Instrument;

use crate::payload::build_task_complete_payload;

/// Counters reported when the pipeline ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplyStats {
    /// Frames handed to the channel.
    pub sent: usize,
    /// Aggregate results that produce no frame.
    pub skipped: usize,
    /// Results whose frame could not be built or sent.
    pub failed: usize,
}

/// Handle to a running reply pipeline.
pub struct ReplyHandle {
    join: JoinHandle<ReplyStats>,
    cancel: oneshot::Sender<()>,
}

impl ReplyHandle {
    /// Whether the pipeline task has ended.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Split into the join handle and the cancel signal.
    #[must_use]
    pub fn into_parts(self) -> (JoinHandle<ReplyStats>, oneshot::Sender<()>) {
        (self.join, self.cancel)
    }
}

/// Spawn the reply pipeline over `results`.
///
/// Frames are sent in the order results arrive.
#[must_use]
pub fn spawn_reply_pipeline(
    results: ResultStream,
    channel: Arc<dyn ControlChannel>,
    instance_id: String,
) -> ReplyHandle {
    let (cancel, cancel_rx) = oneshot::channel();
    let span = tracing::info_span!("reply", %instance_id);
    let pipeline = ReplyPipeline {
        channel,
        instance_id,
        stats: ReplyStats::default(),
    };
    let join = tokio::spawn(pipeline.run(results, cancel_rx).instrument(span));
    ReplyHandle { join, cancel }
}

struct ReplyPipeline {
    channel: Arc<dyn ControlChannel>,
    instance_id: String,
    stats: ReplyStats,
}

impl ReplyPipeline {
    async fn run(mut self, mut results: ResultStream, mut cancel: oneshot::Receiver<()>) -> ReplyStats {
        tracing::info!("Listening for replies");
        let mut cancellable = true;

        loop {
            tokio::select! {
                biased;

                signal = &mut cancel, if cancellable => {
                    if signal.is_ok() {
                        tracing::warn!("Reply pipeline cancelled");
                        break;
                    }
                    // Sender gone without a signal; keep draining.
                    cancellable = false;
                }
                next = results.next() => match next {
                    Some(result) => self.handle(result).await,
                    None => {
                        tracing::info!("Result stream closed");
                        break;
                    }
                },
            }
        }

        tracing::info!(
            sent = self.stats.sent,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            "Reply pipeline finished"
        );
        self.stats
    }

    async fn handle(&mut self, result: DocumentResult) {
        if result.is_aggregate() {
            tracing::info!(
                task_id = %result.message_id,
                status = %result.status,
                "Document finished; aggregate results are not replied"
            );
            self.stats.skipped += 1;
            return;
        }

        tracing::info!(
            task_id = %result.message_id,
            plugin = %result.last_plugin,
            "Received plugin result"
        );

        let frame = match self.frame(&result) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(task_id = %result.message_id, error = %e, "Cannot build reply frame");
                self.stats.failed += 1;
                return;
            }
        };

        match self.channel.send(frame, FrameKind::Binary).await {
            Ok(()) => self.stats.sent += 1,
            Err(e) => {
                tracing::error!(task_id = %result.message_id, error = %e, "Error sending reply");
                self.stats.failed += 1;
            }
        }
    }

    fn frame(&self, result: &DocumentResult) -> Result<bytes::Bytes, ProtocolError> {
        let payload = build_task_complete_payload(
            &result.plugin_results,
            &result.last_plugin,
            &result.message_id,
            &self.instance_id,
            MessageType::TaskComplete.as_str(),
        );
        tracing::debug!(?payload, "Sending reply");
        AgentMessage::task_complete(&payload)?.encode()
    }
}
