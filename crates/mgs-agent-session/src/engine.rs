//! In-process task engine.
//!
//! Runs submitted documents step by step against registered plugins and
//! publishes a result after every step, followed by the document aggregate.
//! Documents run concurrently up to the worker limit; steps within a document
//! run in order.

use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use futures::StreamExt;
use mgs_agent_core::{
    Document, DocumentResult, EngineError, Plugin, PluginContext, PluginOutput, PluginResult,
    ResultStatus, ResultStream, StopType, TaskEngine,
};
use tokio::{
    sync::{Semaphore, mpsc, oneshot},
    task::{JoinHandle, JoinSet},
};
use tokio_stream::wrappers::ReceiverStream;

const RESULT_BUFFER: usize = 64;

type PluginRegistry = HashMap<String, Arc<dyn Plugin>>;

#[derive(Default)]
struct EngineState {
    pending: VecDeque<Document>,
    running: Option<Running>,
    started: bool,
    stopped: bool,
}

struct Running {
    submit_tx: mpsc::UnboundedSender<Document>,
    stop_tx: oneshot::Sender<StopType>,
    dispatcher: JoinHandle<()>,
}

/// Task engine that runs plugins inside the agent process.
pub struct LocalEngine {
    plugins: Arc<PluginRegistry>,
    workers_limit: usize,
    working_dir: PathBuf,
    state: Mutex<EngineState>,
}

impl LocalEngine {
    /// Create an engine running at most `workers_limit` documents at once.
    #[must_use]
    pub fn new(workers_limit: usize) -> Self {
        Self {
            plugins: Arc::new(HashMap::new()),
            workers_limit: workers_limit.max(1),
            working_dir: std::env::temp_dir(),
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Register a plugin under its own name.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        let mut plugins = (*self.plugins).clone();
        plugins.insert(plugin.name().to_string(), plugin);
        self.plugins = Arc::new(plugins);
        self
    }

    /// Working directory handed to plugins.
    #[must_use]
    pub fn with_working_dir(mut self, working_dir: PathBuf) -> Self {
        self.working_dir = working_dir;
        self
    }

    /// Registered plugin names.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Queue a document.
    ///
    /// Before start the document waits for initial processing; afterwards it
    /// is dispatched immediately.
    ///
    /// # Errors
    /// Returns error once the engine is stopping.
    pub fn submit(&self, document: Document) -> Result<(), EngineError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(EngineError::Stopping);
        }
        match &state.running {
            Some(running) => running
                .submit_tx
                .send(document)
                .map_err(|_| EngineError::Stopping),
            None => {
                tracing::debug!(message_id = %document.message_id, "Queued document until start");
                state.pending.push_back(document);
                Ok(())
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[async_trait]
impl TaskEngine for LocalEngine {
    async fn start(&self) -> Result<ResultStream, EngineError> {
        let mut state = self.lock();
        if state.started {
            return Err(EngineError::AlreadyStarted);
        }

        let (result_tx, result_rx) = mpsc::channel(RESULT_BUFFER);
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();

        let dispatcher = Dispatcher {
            plugins: Arc::clone(&self.plugins),
            workers: Arc::new(Semaphore::new(self.workers_limit)),
            working_dir: self.working_dir.clone(),
            result_tx,
        };
        let dispatcher = tokio::spawn(dispatcher.run(submit_rx, stop_rx));

        state.started = true;
        state.running = Some(Running {
            submit_tx,
            stop_tx,
            dispatcher,
        });
        tracing::info!(
            workers = self.workers_limit,
            plugins = ?self.plugin_names(),
            "Task engine started"
        );

        Ok(ReceiverStream::new(result_rx).boxed())
    }

    async fn initial_processing(&self) -> Result<(), EngineError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(running) = &state.running else {
            return Err(if state.stopped {
                EngineError::Stopping
            } else {
                EngineError::NotStarted
            });
        };

        tracing::info!(count = state.pending.len(), "Replaying pending documents");
        for document in state.pending.drain(..) {
            running
                .submit_tx
                .send(document)
                .map_err(|_| EngineError::Internal("dispatcher is gone".into()))?;
        }
        Ok(())
    }

    async fn stop(&self, stop_type: StopType) {
        let running = {
            let mut state = self.lock();
            state.stopped = true;
            state.running.take()
        };
        let Some(Running {
            submit_tx,
            stop_tx,
            dispatcher,
        }) = running
        else {
            tracing::debug!("Task engine not running; nothing to stop");
            return;
        };

        tracing::info!(?stop_type, "Stopping task engine");
        let _ = stop_tx.send(stop_type);
        drop(submit_tx);
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "Task engine dispatcher failed");
        }
        tracing::info!("Task engine stopped");
    }
}

struct Dispatcher {
    plugins: Arc<PluginRegistry>,
    workers: Arc<Semaphore>,
    working_dir: PathBuf,
    result_tx: mpsc::Sender<DocumentResult>,
}

impl Dispatcher {
    /// Dispatch until stopped. The result stream ends when this returns and
    /// every document task has dropped its sender.
    async fn run(
        self,
        mut submit_rx: mpsc::UnboundedReceiver<Document>,
        mut stop_rx: oneshot::Receiver<StopType>,
    ) {
        let mut documents = JoinSet::new();

        let stop_type = loop {
            tokio::select! {
                biased;

                stop = &mut stop_rx => break stop.unwrap_or(StopType::Hard),
                submitted = submit_rx.recv() => match submitted {
                    Some(document) => {
                        documents.spawn(self.run_document(document));
                    }
                    None => break StopType::Soft,
                },
                Some(joined) = documents.join_next(), if !documents.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Document task failed");
                    }
                }
            }
        };

        match stop_type {
            StopType::Soft => {
                while let Ok(document) = submit_rx.try_recv() {
                    documents.spawn(self.run_document(document));
                }
                while let Some(joined) = documents.join_next().await {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Document task failed");
                    }
                }
            }
            StopType::Hard => {
                tracing::warn!(in_flight = documents.len(), "Aborting in-flight documents");
                documents.shutdown().await;
            }
        }
    }

    fn run_document(&self, document: Document) -> impl Future<Output = ()> + Send + 'static {
        let plugins = Arc::clone(&self.plugins);
        let workers = Arc::clone(&self.workers);
        let working_dir = self.working_dir.clone();
        let result_tx = self.result_tx.clone();

        async move {
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            tracing::info!(
                message_id = %document.message_id,
                document = %document.document_name,
                steps = document.steps.len(),
                "Running document"
            );

            let mut plugin_results = HashMap::new();
            let mut status = ResultStatus::NotStarted;

            for step in document.steps {
                let ctx = PluginContext::new(&document.message_id, &step.id, working_dir.clone());
                let start_date_time = now();
                let output = match plugins.get(&step.name) {
                    Some(plugin) => plugin.execute(&ctx, &step.inputs).await,
                    None => {
                        tracing::warn!(plugin = %step.name, "Plugin is not registered");
                        PluginOutput::failed(format!("Plugin {} is not supported", step.name))
                    }
                };
                let text = output.text();
                let result = PluginResult {
                    plugin_id: step.id.clone(),
                    plugin_name: step.name,
                    status: output.status,
                    code: output.exit_code,
                    output: (!text.is_empty()).then_some(text),
                    start_date_time,
                    end_date_time: now(),
                };
                status = status.merge(result.status);
                plugin_results.insert(step.id.clone(), result);

                let event = DocumentResult {
                    message_id: document.message_id.clone(),
                    document_name: document.document_name.clone(),
                    plugin_results: plugin_results.clone(),
                    last_plugin: step.id,
                    status,
                };
                if result_tx.send(event).await.is_err() {
                    tracing::warn!(message_id = %document.message_id, "Result stream dropped");
                    return;
                }
            }

            let message_id = document.message_id.clone();
            let aggregate = DocumentResult {
                message_id: document.message_id,
                document_name: document.document_name,
                plugin_results,
                last_plugin: String::new(),
                status,
            };
            if result_tx.send(aggregate).await.is_err() {
                tracing::warn!(%message_id, "Result stream dropped before document aggregate");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mgs_agent_core::PluginStep;
    use serde_json::{Value, json};

    use super::*;
    use crate::test_support::LogCapture;

    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn name(&self) -> &str {
            "test:echo"
        }

        async fn execute(&self, _ctx: &PluginContext, input: &Value) -> PluginOutput {
            PluginOutput::success(input["text"].as_str().unwrap_or_default())
        }
    }

    /// Never finishes on its own.
    struct HangPlugin;

    #[async_trait]
    impl Plugin for HangPlugin {
        fn name(&self) -> &str {
            "test:hang"
        }

        async fn execute(&self, _ctx: &PluginContext, _input: &Value) -> PluginOutput {
            std::future::pending().await
        }
    }

    fn engine() -> LocalEngine {
        LocalEngine::new(4)
            .with_plugin(Arc::new(EchoPlugin))
            .with_plugin(Arc::new(HangPlugin))
    }

    fn document(id: &str, steps: &[(&str, &str, &str)]) -> Document {
        Document {
            message_id: id.into(),
            document_name: "doc".into(),
            steps: steps
                .iter()
                .map(|(step_id, name, text)| PluginStep {
                    id: (*step_id).into(),
                    name: (*name).into(),
                    inputs: json!({ "text": text }),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_step_results_then_aggregate() {
        let engine = engine();
        let mut results = engine.start().await.unwrap();
        engine
            .submit(document("m-1", &[("one", "test:echo", "a"), ("two", "test:echo", "b")]))
            .unwrap();

        let first = results.next().await.unwrap();
        assert_eq!(first.last_plugin, "one");
        assert_eq!(first.plugin_results["one"].output.as_deref(), Some("a"));

        let second = results.next().await.unwrap();
        assert_eq!(second.last_plugin, "two");
        assert_eq!(second.plugin_results.len(), 2);

        let aggregate = results.next().await.unwrap();
        assert!(aggregate.is_aggregate());
        assert_eq!(aggregate.status, ResultStatus::Success);

        engine.stop(StopType::Soft).await;
        assert!(results.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_plugin_fails_step() {
        let engine = engine();
        let mut results = engine.start().await.unwrap();
        engine.submit(document("m-1", &[("x", "test:missing", "")])).unwrap();

        let step = results.next().await.unwrap();
        assert_eq!(step.plugin_results["x"].status, ResultStatus::Failed);
        assert_eq!(step.plugin_results["x"].code, 1);
        assert_eq!(results.next().await.unwrap().status, ResultStatus::Failed);
    }

    #[tokio::test]
    async fn test_pending_documents_replay_on_initial_processing() {
        let engine = engine();
        engine.submit(document("m-1", &[("one", "test:echo", "queued")])).unwrap();

        let mut results = engine.start().await.unwrap();
        engine.initial_processing().await.unwrap();

        let step = results.next().await.unwrap();
        assert_eq!(step.message_id, "m-1");
        assert_eq!(step.plugin_results["one"].output.as_deref(), Some("queued"));
    }

    #[tokio::test]
    async fn test_initial_processing_requires_start() {
        assert!(matches!(
            engine().initial_processing().await,
            Err(EngineError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let engine = engine();
        let _results = engine.start().await.unwrap();
        assert!(matches!(engine.start().await, Err(EngineError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_hard_stop_aborts_and_closes_stream() {
        let engine = engine();
        let mut results = engine.start().await.unwrap();
        engine.submit(document("m-1", &[("h", "test:hang", "")])).unwrap();

        tokio::time::timeout(Duration::from_secs(5), engine.stop(StopType::Hard))
            .await
            .unwrap();
        assert!(results.next().await.is_none());
        assert!(matches!(
            engine.submit(document("m-2", &[])),
            Err(EngineError::Stopping)
        ));
    }

    #[tokio::test]
    async fn test_soft_stop_lets_documents_finish() {
        let engine = engine();
        let mut results = engine.start().await.unwrap();
        engine.submit(document("m-1", &[("one", "test:echo", "a")])).unwrap();
        engine.stop(StopType::Soft).await;

        let collected: Vec<_> = results.collect().await;
        assert_eq!(collected.len(), 2);
        assert!(collected[1].is_aggregate());
    }

    #[tokio::test]
    async fn test_dropped_stream_before_aggregate_is_logged() {
        let capture = LogCapture::default();
        let _guard = capture.install();
        let engine = engine();
        drop(engine.start().await.unwrap());

        engine.submit(document("m-empty", &[])).unwrap();
        engine.stop(StopType::Soft).await;

        let logged = capture.contents();
        assert!(logged.contains("Result stream dropped before document aggregate"), "{logged}");
        assert!(logged.contains("m-empty"));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let engine = engine();
        engine.stop(StopType::Soft).await;
        assert!(matches!(
            engine.submit(document("m-1", &[])),
            Err(EngineError::Stopping)
        ));
    }

    #[tokio::test]
    async fn test_worker_limit_bounds_concurrency() {
        let engine = LocalEngine::new(1)
            .with_plugin(Arc::new(EchoPlugin))
            .with_plugin(Arc::new(HangPlugin));
        let mut results = engine.start().await.unwrap();
        engine.submit(document("m-1", &[("h", "test:hang", "")])).unwrap();
        engine.submit(document("m-2", &[("one", "test:echo", "a")])).unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(100), results.next()).await;
        assert!(waited.is_err());
        engine.stop(StopType::Hard).await;
    }
}
