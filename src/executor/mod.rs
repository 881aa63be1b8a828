// Fallback executor
//
// An actor that owns the fallback model and serves commands sent over a channel:
// - backend: the ModelLoader / TranslationModel seams and the command-line backend
// - model_cell: single-flight loading of the model handle
// - stdio: hosts the same actor in a separate process over NDJSON
//
// The orchestrator only ever talks to it through ExecutorHandle, which routes the
// responses of each request back to the caller that sent it.

pub mod backend;
pub mod model_cell;
pub mod stdio;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub use backend::{CommandModelLoader, ModelLoader, TranslationModel};
pub use model_cell::ModelCell;

use crate::error::{LexError, Result};
use crate::languages::LanguageCodeTable;
use crate::protocol::{Envelope, RequestId, WorkerCommand, WorkerResponse};

pub type CommandSender = mpsc::Sender<Envelope<WorkerCommand>>;
pub type ResponseSender = mpsc::UnboundedSender<Envelope<WorkerResponse>>;

/// The actor side: consumes commands, emits responses
pub struct FallbackExecutor {
    cell: Arc<ModelCell>,
    table: LanguageCodeTable,
    commands: mpsc::Receiver<Envelope<WorkerCommand>>,
    responses: ResponseSender,
}

impl FallbackExecutor {
    pub fn new(
        cell: Arc<ModelCell>,
        commands: mpsc::Receiver<Envelope<WorkerCommand>>,
        responses: ResponseSender,
    ) -> Self {
        Self {
            cell,
            table: LanguageCodeTable::standard(),
            commands,
            responses,
        }
    }

    /// Serve commands until every command sender is dropped.
    /// Translate commands run on their own tasks so they can overlap.
    pub async fn run(mut self) {
        info!("Fallback executor started");

        while let Some(Envelope { request_id, body }) = self.commands.recv().await {
            match body {
                WorkerCommand::Preload => {
                    if self.cell.preload() {
                        info!("Preloading fallback model ({})", request_id);
                    } else {
                        let state = if self.cell.is_ready() { "ready" } else { "loading" };
                        debug!("Preload {} ignored, model already {}", request_id, state);
                    }
                }
                WorkerCommand::Translate { text, source_language, target_language } => {
                    let job = TranslateJob {
                        request_id,
                        cell: Arc::clone(&self.cell),
                        table: self.table,
                        responses: self.responses.clone(),
                    };
                    tokio::spawn(job.run(text, source_language, target_language));
                }
            }
        }

        info!(
            "Command channel closed, fallback executor stopping after {} model load(s)",
            self.cell.loads_started()
        );
    }
}

struct TranslateJob {
    request_id: RequestId,
    cell: Arc<ModelCell>,
    table: LanguageCodeTable,
    responses: ResponseSender,
}

impl TranslateJob {
    async fn run(self, text: String, source_language: Option<String>, target_language: String) {
        let response = self.translate(&text, source_language.as_deref(), &target_language).await;
        self.emit(response);
    }

    async fn translate(
        &self,
        text: &str,
        source_language: Option<&str>,
        target_language: &str,
    ) -> WorkerResponse {
        // Unsupported targets never reach the model
        let target = match self.table.resolve_target(target_language) {
            Ok(code) => code,
            Err(e) => {
                warn!("Rejecting request {}: {}", self.request_id, e);
                return WorkerResponse::error(e.to_string());
            }
        };

        self.emit(WorkerResponse::LoadingModel);
        let model = match self.cell.ensure_loaded().await {
            Ok(model) => model,
            Err(e) => return WorkerResponse::error(e.to_string()),
        };

        self.emit(WorkerResponse::Translating);
        let source = self.table.resolve_source(source_language);
        debug!(
            "Request {}: {:?} -> {} resolved to {} -> {}",
            self.request_id, source_language, target_language, source, target
        );

        match model.run_inference(text, source, target).await {
            Ok(translated_text) => WorkerResponse::Success { translated_text },
            Err(e) => {
                error!("Inference failed for request {}: {}", self.request_id, e);
                WorkerResponse::error(e.to_string())
            }
        }
    }

    fn emit(&self, response: WorkerResponse) {
        if self.responses.send(Envelope::new(self.request_id, response)).is_err() {
            debug!("Response channel closed, dropping response for {}", self.request_id);
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<RequestId, mpsc::UnboundedSender<WorkerResponse>>>>;

/// Caller side of a running fallback executor
#[derive(Clone)]
pub struct ExecutorHandle {
    commands: CommandSender,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

/// Responses of one Translate request, in emission order
pub struct PendingTranslation {
    pub request_id: RequestId,
    responses: mpsc::UnboundedReceiver<WorkerResponse>,
}

impl PendingTranslation {
    /// Next response, `None` once the executor has gone away
    pub async fn next(&mut self) -> Option<WorkerResponse> {
        self.responses.recv().await
    }
}

impl ExecutorHandle {
    /// Spawn the actor and its response router on the current runtime
    pub fn spawn(loader: Arc<dyn ModelLoader>, capacity: usize) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| LexError::ExecutorUnavailable(e.to_string()))?;
        if capacity == 0 {
            return Err(LexError::ExecutorUnavailable(
                "command channel capacity must be at least 1".to_string(),
            ));
        }

        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let cell = Arc::new(ModelCell::new(loader));
        runtime.spawn(FallbackExecutor::new(cell, command_rx, response_tx).run());

        Ok(Self::connect(command_tx, response_rx))
    }

    /// Attach to an executor reachable through the given channels.
    /// Must be called within a tokio runtime.
    pub fn connect(
        commands: CommandSender,
        responses: mpsc::UnboundedReceiver<Envelope<WorkerResponse>>,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(route_responses(responses, Arc::clone(&pending)));

        Self {
            commands,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Ask the executor to start loading its model. Does not wait for the load.
    pub async fn preload(&self) -> Result<()> {
        let request_id = self.next_request_id();
        self.send(Envelope::new(request_id, WorkerCommand::Preload)).await
    }

    pub async fn translate(
        &self,
        text: impl Into<String>,
        source_language: Option<String>,
        target_language: impl Into<String>,
    ) -> Result<PendingTranslation> {
        let request_id = self.next_request_id();
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.pending).insert(request_id, tx);

        let command = WorkerCommand::Translate {
            text: text.into(),
            source_language,
            target_language: target_language.into(),
        };
        debug!("Dispatching {} to fallback executor: {:?}", request_id, command);

        if let Err(e) = self.send(Envelope::new(request_id, command)).await {
            lock(&self.pending).remove(&request_id);
            return Err(e);
        }

        Ok(PendingTranslation {
            request_id,
            responses: rx,
        })
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn send(&self, envelope: Envelope<WorkerCommand>) -> Result<()> {
        self.commands
            .send(envelope)
            .await
            .map_err(|_| LexError::ExecutorUnavailable("fallback executor has stopped".to_string()))
    }
}

/// Forward each response to the caller waiting on its request id
async fn route_responses(
    mut responses: mpsc::UnboundedReceiver<Envelope<WorkerResponse>>,
    pending: PendingMap,
) {
    while let Some(Envelope { request_id, body }) = responses.recv().await {
        let terminal = body.is_terminal();
        let mut waiting = lock(&pending);

        let delivered = match waiting.get(&request_id) {
            Some(tx) => tx.send(body).is_ok(),
            None => {
                debug!("Discarding response for unknown request {}", request_id);
                true
            }
        };

        if !delivered {
            debug!("Caller for {} went away", request_id);
        }
        if terminal || !delivered {
            waiting.remove(&request_id);
        }
    }

    // Executor is gone: wake every waiter with a closed channel
    lock(&pending).clear();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::backend::fakes::CountingLoader;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    async fn collect(mut pending: PendingTranslation) -> Vec<WorkerResponse> {
        let mut seen = Vec::new();
        while let Some(response) = pending.next().await {
            let terminal = response.is_terminal();
            seen.push(response);
            if terminal {
                break;
            }
        }
        seen
    }

    fn spawn_with(loader: CountingLoader) -> (ExecutorHandle, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let loads = Arc::clone(&loader.loads);
        let inferences = Arc::clone(&loader.inferences);
        let handle = ExecutorHandle::spawn(Arc::new(loader), 8).unwrap();
        (handle, loads, inferences)
    }

    #[tokio::test]
    async fn test_translate_response_order() {
        let (executor, _, _) = spawn_with(CountingLoader::new(Duration::from_millis(5)));

        let pending = executor.translate("Hello", None, "es").await.unwrap();
        let responses = collect(pending).await;

        assert_eq!(
            responses,
            vec![
                WorkerResponse::LoadingModel,
                WorkerResponse::Translating,
                WorkerResponse::Success {
                    translated_text: "[eng_Latn->spa_Latn] Hello".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_source_language_is_normalized() {
        let (executor, _, _) = spawn_with(CountingLoader::new(Duration::ZERO));

        let known = collect(executor.translate("Hallo", Some("de".to_string()), "fr").await.unwrap()).await;
        let unknown = collect(executor.translate("Ciao", Some("it".to_string()), "ja").await.unwrap()).await;

        assert_eq!(
            known.last(),
            Some(&WorkerResponse::Success { translated_text: "[deu_Latn->fra_Latn] Hallo".to_string() })
        );
        assert_eq!(
            unknown.last(),
            Some(&WorkerResponse::Success { translated_text: "[eng_Latn->jpn_Jpan] Ciao".to_string() })
        );
    }

    #[tokio::test]
    async fn test_unsupported_target_never_touches_model() {
        let (executor, loads, inferences) = spawn_with(CountingLoader::new(Duration::ZERO));

        let responses = collect(executor.translate("Hello", None, "xx").await.unwrap()).await;

        assert_eq!(responses.len(), 1);
        match &responses[0] {
            WorkerResponse::Error { message } => assert!(message.contains("\"xx\"")),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(inferences.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inference_failure_is_reported() {
        let (executor, _, _) = spawn_with(CountingLoader::new(Duration::ZERO));

        let responses = collect(executor.translate("fail", None, "es").await.unwrap()).await;

        assert_eq!(responses[..2], [WorkerResponse::LoadingModel, WorkerResponse::Translating]);
        match responses.last() {
            Some(WorkerResponse::Error { message }) => assert!(message.contains("model exploded")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_failure_is_reported_then_retried() {
        let (executor, loads, _) =
            spawn_with(CountingLoader::new(Duration::ZERO).failing(1));

        let first = collect(executor.translate("Hello", None, "es").await.unwrap()).await;
        assert_eq!(first.len(), 2);
        assert!(matches!(first[1], WorkerResponse::Error { ref message } if message.contains("weights unavailable")));

        let second = collect(executor.translate("Hello", None, "es").await.unwrap()).await;
        assert!(matches!(second.last(), Some(WorkerResponse::Success { .. })));
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_preload_loads_once() {
        let (executor, loads, _) = spawn_with(CountingLoader::new(Duration::from_millis(20)));

        for _ in 0..5 {
            executor.preload().await.unwrap();
        }
        let responses = collect(executor.translate("Hello", None, "hi").await.unwrap()).await;

        assert!(matches!(responses.last(), Some(WorkerResponse::Success { .. })));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_translates_share_one_load() {
        let (executor, loads, inferences) =
            spawn_with(CountingLoader::new(Duration::from_millis(50)));

        let a = executor.translate("one", None, "es").await.unwrap();
        let b = executor.translate("two", None, "fr").await.unwrap();
        let c = executor.translate("three", None, "de").await.unwrap();
        let ids = [a.request_id, b.request_id, c.request_id];
        let (a, b, c) = tokio::join!(collect(a), collect(b), collect(c));

        assert_eq!(a.last(), Some(&WorkerResponse::Success { translated_text: "[eng_Latn->spa_Latn] one".to_string() }));
        assert_eq!(b.last(), Some(&WorkerResponse::Success { translated_text: "[eng_Latn->fra_Latn] two".to_string() }));
        assert_eq!(c.last(), Some(&WorkerResponse::Success { translated_text: "[eng_Latn->deu_Latn] three".to_string() }));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(inferences.load(Ordering::SeqCst), 3);
        assert!(ids[0] < ids[1] && ids[1] < ids[2]);
    }

    #[test]
    fn test_spawn_without_runtime_is_unavailable() {
        let result = ExecutorHandle::spawn(Arc::new(CountingLoader::new(Duration::ZERO)), 8);
        assert!(matches!(result, Err(LexError::ExecutorUnavailable(_))));
    }
}
