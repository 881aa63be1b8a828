// Translation orchestrator
//
// Decides per request between the native engine and the fallback executor:
// - strategy: the pure selection / recovery functions
// - sink: where text and status updates are written
//
// The native path streams chunks straight into the sink. Any failure on it
// reverts the sink to the original text and hands the request to the fallback
// executor, whose single terminal response replaces the sink content.

pub mod sink;
pub mod strategy;

use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

pub use sink::{ConsoleSink, MemorySink, OutputSink, TranslationPath, TranslationStatus};
pub use strategy::{FallbackReason, NativeFailure, Strategy};

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::executor::ExecutorHandle;
use crate::native::{first_usable_language, CapabilityProvider, DownloadProgress, NativeCapabilities};
use crate::protocol::WorkerResponse;

/// One translation attempt as requested by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    pub text: String,
    pub target_language: String,
    pub force_fallback: bool,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, target_language: impl Into<String>, force_fallback: bool) -> Self {
        Self {
            text: text.into(),
            target_language: target_language.into(),
            force_fallback,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Completed { path: TranslationPath, text: String },
    Failed { message: String },
    /// A newer request for the same sink started; this one's output was discarded
    Superseded,
}

enum FallbackSlot {
    Ready(ExecutorHandle),
    Unavailable(String),
}

pub struct Orchestrator {
    capabilities: CapabilityProvider,
    fallback: FallbackSlot,
    config: OrchestratorConfig,
    preload_on_startup: bool,
    originals: Mutex<HashMap<String, String>>,
    tickets: Mutex<HashMap<String, u64>>,
    next_ticket: AtomicU64,
}

impl Orchestrator {
    /// `fallback` is the result of constructing the executor at startup. A failure
    /// is reported once here and then surfaced on every request that needs it.
    pub fn new(
        capabilities: CapabilityProvider,
        fallback: Result<ExecutorHandle>,
        config: OrchestratorConfig,
    ) -> Self {
        let fallback = match fallback {
            Ok(handle) => FallbackSlot::Ready(handle),
            Err(e) => {
                error!("Failed to initialize the fallback executor: {}", e);
                FallbackSlot::Unavailable(e.to_string())
            }
        };

        Self {
            capabilities,
            fallback,
            config,
            preload_on_startup: false,
            originals: Mutex::new(HashMap::new()),
            tickets: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn with_preload_on_startup(mut self, preload: bool) -> Self {
        self.preload_on_startup = preload;
        self
    }

    /// Let the fallback executor start loading its model ahead of the first request
    pub async fn warm_up(&self) {
        let FallbackSlot::Ready(executor) = &self.fallback else {
            return;
        };
        if self.capabilities.is_available() && !self.preload_on_startup {
            return;
        }

        debug!("Sending preload to fallback executor");
        if let Err(e) = executor.preload().await {
            warn!("Failed to preload fallback model: {}", e);
        }
    }

    /// Translate the sink's original content. The first call remembers the
    /// original text; later calls keep translating that, not the last output.
    pub async fn translate_target(
        &self,
        sink: &dyn OutputSink,
        target_language: &str,
        force_fallback: bool,
    ) -> TranslationOutcome {
        let original = {
            let mut originals = lock(&self.originals);
            match originals.get(sink.id()) {
                Some(original) => original.clone(),
                None => {
                    let text = sink.text();
                    if text.trim().is_empty() {
                        debug!("Sink '{}' has no text to translate", sink.id());
                        return TranslationOutcome::Failed {
                            message: "Nothing to translate".to_string(),
                        };
                    }
                    originals.insert(sink.id().to_string(), text.clone());
                    text
                }
            }
        };

        let request = TranslationRequest::new(original, target_language, force_fallback);
        self.translate(&request, sink).await
    }

    /// Remembered original text of a sink
    pub fn original_text(&self, sink_id: &str) -> Option<String> {
        lock(&self.originals).get(sink_id).cloned()
    }

    /// Forget a sink's original so the next call captures its current text
    pub fn forget(&self, sink_id: &str) {
        lock(&self.originals).remove(sink_id);
    }

    /// Run one request to a terminal state. Never fails: errors end up as a
    /// `Failed` outcome and a visible error state on the sink.
    pub async fn translate(&self, request: &TranslationRequest, sink: &dyn OutputSink) -> TranslationOutcome {
        let ticket = self.issue_ticket(sink.id());
        let span = info_span!("translate", ticket, target = %request.target_language);

        async {
            let mut strategy = Strategy::select(request.force_fallback, self.capabilities.is_available());

            loop {
                match strategy {
                    Strategy::TryNative => {
                        let Some(native) = self.capabilities.capabilities() else {
                            strategy = Strategy::Fallback(FallbackReason::NativeUnavailable);
                            continue;
                        };

                        match self.run_native(native, request, sink, ticket).await {
                            Ok(outcome) => return outcome,
                            Err(failure) => {
                                // A newer request owns the sink; a fallback result would be discarded
                                if !self.write(sink, ticket, |s| s.set_text(&request.text)) {
                                    debug!("Native translation failed after being superseded: {}", failure);
                                    return TranslationOutcome::Superseded;
                                }
                                warn!("Built-in translation failed, falling back to executor: {}", failure);
                                strategy = Strategy::recover(failure);
                            }
                        }
                    }
                    Strategy::Fallback(reason) => {
                        return self.run_fallback(request, reason, sink, ticket).await;
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_native(
        &self,
        native: &NativeCapabilities,
        request: &TranslationRequest,
        sink: &dyn OutputSink,
        ticket: u64,
    ) -> std::result::Result<TranslationOutcome, NativeFailure> {
        self.report(sink, ticket, TranslationStatus::Detecting);
        let detections = native
            .detector
            .detect(&request.text)
            .await
            .map_err(|e| NativeFailure::Detection(e.to_string()))?;

        let source_language = first_usable_language(&detections).ok_or_else(|| {
            NativeFailure::Detection("Language detection returned an empty or invalid result".to_string())
        })?;
        debug!("Detected source language: {}", source_language);

        let engine_failure = |message: String| NativeFailure::Engine {
            detected_language: source_language.clone(),
            message,
        };

        self.report(sink, ticket, TranslationStatus::PreparingModel);
        let monitor = |progress: DownloadProgress| {
            if let Some(percent) = progress.percentage() {
                self.report(sink, ticket, TranslationStatus::Downloading { percent });
            }
        };
        let translator = native
            .translators
            .create(&source_language, &request.target_language, &monitor)
            .await
            .map_err(|e| engine_failure(e.to_string()))?;

        self.report(sink, ticket, TranslationStatus::Streaming);
        if !self.write(sink, ticket, |s| s.set_text("")) {
            return Ok(TranslationOutcome::Superseded);
        }

        let mut chunks = translator.translate_streaming(&request.text);
        let mut translated = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| engine_failure(e.to_string()))?;
            if !self.write(sink, ticket, |s| s.append(&chunk)) {
                return Ok(TranslationOutcome::Superseded);
            }
            translated.push_str(&chunk);
        }

        if translated.trim().is_empty() {
            return Err(engine_failure("Native engine returned an empty translation".to_string()));
        }

        info!("Native translation finished ({} -> {})", source_language, request.target_language);
        self.report(sink, ticket, TranslationStatus::Completed { path: TranslationPath::Native });
        Ok(TranslationOutcome::Completed {
            path: TranslationPath::Native,
            text: translated,
        })
    }

    async fn run_fallback(
        &self,
        request: &TranslationRequest,
        reason: FallbackReason,
        sink: &dyn OutputSink,
        ticket: u64,
    ) -> TranslationOutcome {
        let executor = match &self.fallback {
            FallbackSlot::Ready(executor) => executor,
            FallbackSlot::Unavailable(cause) => {
                return self.fail(sink, ticket, format!("Fallback executor is not available: {}", cause));
            }
        };

        info!("Using fallback translator: {}", reason);
        self.report(sink, ticket, TranslationStatus::FallingBack { reason: reason.to_string() });

        let started = Instant::now();
        let pending = executor
            .translate(
                request.text.clone(),
                reason.source_language().map(str::to_string),
                request.target_language.clone(),
            )
            .await;
        let mut pending = match pending {
            Ok(pending) => pending,
            Err(e) => return self.fail(sink, ticket, e.to_string()),
        };
        debug!("Fallback request {} dispatched", pending.request_id);

        while let Some(response) = pending.next().await {
            match response {
                WorkerResponse::LoadingModel => self.report(sink, ticket, TranslationStatus::LoadingModel),
                WorkerResponse::Translating => self.report(sink, ticket, TranslationStatus::Translating),
                WorkerResponse::Success { translated_text } => {
                    info!("Fallback translation finished in {:?}", started.elapsed());
                    if !self.write(sink, ticket, |s| s.set_text(&translated_text)) {
                        return TranslationOutcome::Superseded;
                    }
                    self.report(sink, ticket, TranslationStatus::Completed { path: TranslationPath::Fallback });
                    return TranslationOutcome::Completed {
                        path: TranslationPath::Fallback,
                        text: translated_text,
                    };
                }
                WorkerResponse::Error { message } => {
                    info!("Fallback translation failed after {:?}", started.elapsed());
                    return self.fail(sink, ticket, message);
                }
            }
        }

        self.fail(sink, ticket, "Fallback executor stopped before answering".to_string())
    }

    fn fail(&self, sink: &dyn OutputSink, ticket: u64, message: String) -> TranslationOutcome {
        error!("Translation failed: {}", message);
        if !self.write(sink, ticket, |s| s.set_text(&self.config.error_placeholder)) {
            return TranslationOutcome::Superseded;
        }
        sink.status(&TranslationStatus::Failed { message: message.clone() });
        TranslationOutcome::Failed { message }
    }

    fn issue_ticket(&self, sink_id: &str) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        lock(&self.tickets).insert(sink_id.to_string(), ticket);
        ticket
    }

    fn is_current(&self, sink_id: &str, ticket: u64) -> bool {
        lock(&self.tickets).get(sink_id).copied() == Some(ticket)
    }

    /// Apply `update` unless a newer request owns the sink
    fn write(&self, sink: &dyn OutputSink, ticket: u64, update: impl FnOnce(&dyn OutputSink)) -> bool {
        if !self.is_current(sink.id(), ticket) {
            debug!("Request superseded, discarding its output");
            return false;
        }
        update(sink);
        true
    }

    fn report(&self, sink: &dyn OutputSink, ticket: u64, status: TranslationStatus) {
        if self.is_current(sink.id(), ticket) {
            debug!("Status: {}", status.describe());
            sink.status(&status);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
