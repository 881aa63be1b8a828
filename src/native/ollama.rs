use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    ChunkStream, DetectionResult, DownloadProgress, LanguageDetector, NativeTranslator,
    ProgressMonitor, TranslatorFactory,
};
use crate::config::NativeConfig;
use crate::error::{LexError, Result};
use crate::languages::language_name;

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

/// One line of a /api/generate response (the only line when not streaming)
#[derive(Debug, Clone, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DetectionPayload {
    language: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct PullProgress {
    #[serde(default)]
    status: String,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionResponse {
    version: String,
}

/// Language detection and streaming translation served by Ollama
pub struct OllamaNative {
    client: Client,
    config: NativeConfig,
}

impl OllamaNative {
    pub fn new(config: NativeConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Check the server answers; returns its version
    pub async fn probe(&self) -> Result<String> {
        let url = format!("{}/api/version", self.config.endpoint);
        let response = self.client
            .get(&url)
            .timeout(self.request_timeout())
            .send()
            .await
            .map_err(|e| LexError::Engine(format!("Failed to connect to Ollama: {}", e)))?;

        if !response.status().is_success() {
            return Err(LexError::Engine(format!(
                "Ollama version check failed: {}",
                response.status()
            )));
        }

        let version: VersionResponse = response.json().await?;
        Ok(version.version)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// Make sure `model` exists locally, pulling it when allowed
    async fn ensure_model(&self, model: &str, monitor: ProgressMonitor<'_>) -> Result<()> {
        let url = format!("{}/api/show", self.config.endpoint);
        let response = self.client
            .post(&url)
            .timeout(self.request_timeout())
            .json(&json!({ "name": model }))
            .send()
            .await
            .map_err(|e| LexError::Engine(format!("Failed to connect to Ollama: {}", e)))?;

        if response.status().is_success() {
            debug!("Ollama model '{}' is available", model);
            return Ok(());
        }

        if response.status() != StatusCode::NOT_FOUND {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Engine(format!("Ollama API error {}: {}", status, error_text)));
        }

        if !self.config.auto_pull {
            return Err(LexError::Engine(format!(
                "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
                model, model
            )));
        }

        self.pull_model(model, monitor).await
    }

    async fn pull_model(&self, model: &str, monitor: ProgressMonitor<'_>) -> Result<()> {
        info!("Pulling Ollama model '{}'", model);
        let url = format!("{}/api/pull", self.config.endpoint);
        let response = self.client
            .post(&url)
            .json(&json!({ "name": model, "stream": true }))
            .send()
            .await
            .map_err(|e| LexError::Engine(format!("Failed to start model pull: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Engine(format!("Model pull failed {}: {}", status, error_text)));
        }

        let updates = decode_ndjson::<_, _, PullProgress>(response.bytes_stream().boxed());
        follow_pull(model, updates, monitor).await
    }
}

/// Forward pull progress to `monitor` until the server reports success
async fn follow_pull<S>(model: &str, mut updates: S, monitor: ProgressMonitor<'_>) -> Result<()>
where
    S: Stream<Item = Result<PullProgress>> + Unpin,
{
    while let Some(update) = updates.next().await {
        let update = update?;
        if let Some(error) = update.error {
            return Err(LexError::Engine(format!("Model pull failed: {}", error)));
        }
        if let (Some(total), Some(completed)) = (update.total, update.completed) {
            monitor(DownloadProgress { loaded: completed, total });
        }
        if update.status == "success" {
            info!("Pulled Ollama model '{}'", model);
            return Ok(());
        }
    }

    Err(LexError::Engine(format!("Model pull for '{}' ended without success", model)))
}

#[async_trait]
impl LanguageDetector for OllamaNative {
    async fn detect(&self, text: &str) -> Result<Vec<DetectionResult>> {
        let request = GenerateRequest {
            model: self.config.detection_model().to_string(),
            prompt: build_detection_prompt(text),
            stream: false,
            format: Some("json".to_string()),
            options: GenerateOptions { temperature: 0.0 },
        };

        let url = format!("{}/api/generate", self.config.endpoint);
        let response = self.client
            .post(&url)
            .timeout(self.request_timeout())
            .json(&request)
            .send()
            .await
            .map_err(|e| LexError::Detection(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LexError::Detection(format!("Ollama API error {}: {}", status, error_text)));
        }

        let reply: GenerateChunk = response.json().await?;
        debug!("Raw detection response: {}", reply.response);
        Ok(parse_detection(&reply.response))
    }
}

#[async_trait]
impl TranslatorFactory for OllamaNative {
    async fn create(
        &self,
        source_language: &str,
        target_language: &str,
        monitor: ProgressMonitor<'_>,
    ) -> Result<Box<dyn NativeTranslator>> {
        self.ensure_model(&self.config.model, monitor).await?;

        Ok(Box::new(OllamaTranslator {
            client: self.client.clone(),
            idle_timeout: Duration::from_secs(self.config.stream_idle_timeout_secs),
            url: format!("{}/api/generate", self.config.endpoint),
            model: self.config.model.clone(),
            source_language: source_language.to_string(),
            target_language: target_language.to_string(),
        }))
    }
}

/// Translator bound to one language pair
pub struct OllamaTranslator {
    client: Client,
    idle_timeout: Duration,
    url: String,
    model: String,
    source_language: String,
    target_language: String,
}

#[async_trait]
impl NativeTranslator for OllamaTranslator {
    fn translate_streaming(&self, text: &str) -> ChunkStream {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: build_translation_prompt(text, &self.source_language, &self.target_language),
            stream: true,
            format: None,
            options: GenerateOptions { temperature: 0.0 },
        };
        let pending = self.client.post(&self.url).json(&request);

        let chunks = stream::once(async move {
            let response = pending
                .send()
                .await
                .map_err(|e| LexError::Engine(format!("HTTP request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(LexError::Engine(format!("Ollama API error {}: {}", status, error_text)));
            }

            Ok(translation_chunks(response.bytes_stream().boxed()))
        })
        .try_flatten()
        .boxed();

        with_idle_timeout(chunks, self.idle_timeout)
    }
}

/// Text chunks of a streaming /api/generate body; an `error` line fails the stream
fn translation_chunks<S, B>(body: S) -> ChunkStream
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    decode_ndjson::<_, _, GenerateChunk>(body)
        .try_filter_map(|chunk| async move {
            if let Some(error) = chunk.error {
                return Err(LexError::Engine(error));
            }
            Ok(Some(chunk.response).filter(|text| !text.is_empty()))
        })
        .boxed()
}

/// Fail the stream when no item arrives within `idle`
fn with_idle_timeout(chunks: ChunkStream, idle: Duration) -> ChunkStream {
    stream::unfold(Some(chunks), move |state| async move {
        let mut chunks = state?;
        match tokio::time::timeout(idle, chunks.next()).await {
            Ok(Some(item)) => Some((item, Some(chunks))),
            Ok(None) => None,
            Err(_) => {
                warn!("Ollama stream stalled for {:?}", idle);
                let stalled = LexError::Engine(format!("No output from Ollama for {:?}", idle));
                Some((Err(stalled), None))
            }
        }
    })
    .boxed()
}

fn build_detection_prompt(text: &str) -> String {
    format!(
        "Identify the language of the text below.\n\
         \n\
         Return ONLY JSON in the form {{\"language\":\"<ISO 639-1 code>\",\"confidence\":<0.0-1.0>}}.\n\
         \n\
         [Text]\n\
         {}\n",
        text
    )
}

fn build_translation_prompt(text: &str, source_language: &str, target_language: &str) -> String {
    let source_name = language_name(source_language);
    let target_name = language_name(target_language);

    format!(
        "You are a professional translator.\n\
         \n\
         Translate the text below from {} to {} (language code: {}).\n\
         Return ONLY the translation. Do not include explanations, quotes or alternatives.\n\
         \n\
         [Text to translate]\n\
         {}\n",
        source_name, target_name, target_language, text
    )
}

/// Turn the model's JSON reply into detection results; unusable replies yield none
fn parse_detection(raw: &str) -> Vec<DetectionResult> {
    match serde_json::from_str::<DetectionPayload>(raw.trim()) {
        Ok(payload) => {
            let language = payload.language.trim().to_lowercase();
            if language.is_empty() || language == "unknown" {
                return Vec::new();
            }
            vec![DetectionResult::new(language, payload.confidence.unwrap_or(0.0))]
        }
        Err(e) => {
            warn!("Unparsable detection response: {}", e);
            Vec::new()
        }
    }
}

/// Decode a byte stream of newline-delimited JSON values
fn decode_ndjson<S, B, T>(body: S) -> BoxStream<'static, Result<T>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    stream::try_unfold((body, Vec::new()), |(body, buffer)| next_value(body, buffer)).boxed()
}

async fn next_value<S, B, T>(mut body: S, mut buffer: Vec<u8>) -> Result<Option<(T, (S, Vec<u8>))>>
where
    S: Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
    T: DeserializeOwned,
{
    loop {
        if let Some(end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let value = serde_json::from_slice(&line)?;
            return Ok(Some((value, (body, buffer))));
        }

        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(chunk?.as_ref()),
            None => {
                if buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                // Last line without a trailing newline
                let value = serde_json::from_slice(&std::mem::take(&mut buffer))?;
                return Ok(Some((value, (body, buffer))));
            }
        }
    }
}
