// Native translation capability
//
// The fast path the orchestrator tries first. It is made of two opaque async
// capabilities, a language detector and a translator factory, bundled in a
// CapabilityProvider that is resolved once at startup:
// - Native: both capabilities are present
// - Absent: the orchestrator goes straight to the fallback executor
//
// ollama.rs implements both capabilities against an Ollama server.

pub mod ollama;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::NativeConfig;
use crate::error::Result;

/// One candidate language reported by a detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub detected_language: Option<String>,
    pub confidence: f32,
}

impl DetectionResult {
    pub fn new(language: impl Into<String>, confidence: f32) -> Self {
        Self {
            detected_language: Some(language.into()),
            confidence,
        }
    }
}

/// First result carrying a non-empty language code
pub fn first_usable_language(results: &[DetectionResult]) -> Option<String> {
    results
        .first()
        .and_then(|r| r.detected_language.as_deref())
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(str::to_string)
}

/// Download or preparation progress of a native translator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadProgress {
    pub loaded: u64,
    pub total: u64,
}

impl DownloadProgress {
    /// Whole percent, `None` while the total is unknown
    pub fn percentage(&self) -> Option<u8> {
        if self.total == 0 {
            return None;
        }
        let percent = (self.loaded.min(self.total) as f64 / self.total as f64) * 100.0;
        Some(percent.round() as u8)
    }
}

/// Receives progress while a translator is being prepared
pub type ProgressMonitor<'a> = &'a (dyn Fn(DownloadProgress) + Send + Sync);

/// Ordered translation chunks; finite and not restartable
pub type ChunkStream = BoxStream<'static, Result<String>>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Vec<DetectionResult>>;
}

#[async_trait]
pub trait TranslatorFactory: Send + Sync {
    /// Prepare a translator for one language pair, reporting download progress
    async fn create(
        &self,
        source_language: &str,
        target_language: &str,
        monitor: ProgressMonitor<'_>,
    ) -> Result<Box<dyn NativeTranslator>>;
}

#[async_trait]
pub trait NativeTranslator: Send + Sync {
    fn translate_streaming(&self, text: &str) -> ChunkStream;

    /// Batch translation: the concatenation of the streamed chunks
    async fn translate(&self, text: &str) -> Result<String> {
        let mut stream = self.translate_streaming(text);
        let mut translated = String::new();
        while let Some(chunk) = stream.next().await {
            translated.push_str(&chunk?);
        }
        Ok(translated)
    }
}

#[derive(Clone)]
pub struct NativeCapabilities {
    pub detector: Arc<dyn LanguageDetector>,
    pub translators: Arc<dyn TranslatorFactory>,
}

/// Whether the native path exists in this environment
#[derive(Clone)]
pub enum CapabilityProvider {
    Native(NativeCapabilities),
    Absent,
}

impl CapabilityProvider {
    pub fn native(
        detector: Arc<dyn LanguageDetector>,
        translators: Arc<dyn TranslatorFactory>,
    ) -> Self {
        Self::Native(NativeCapabilities { detector, translators })
    }

    pub fn capabilities(&self) -> Option<&NativeCapabilities> {
        match self {
            Self::Native(capabilities) => Some(capabilities),
            Self::Absent => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Native(_))
    }

    /// Probe the configured native engine once
    pub async fn resolve(config: &NativeConfig) -> Self {
        if !config.enabled {
            info!("Native translation disabled by configuration");
            return Self::Absent;
        }

        let engine = match ollama::OllamaNative::new(config.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                warn!("Native translation unavailable: {}", e);
                return Self::Absent;
            }
        };

        match engine.probe().await {
            Ok(version) => {
                info!("Native translation available (Ollama {} at {})", version, config.endpoint);
                let engine = Arc::new(engine);
                Self::native(engine.clone(), engine)
            }
            Err(e) => {
                warn!("Native translation unavailable: {}", e);
                Self::Absent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    struct Chunks(Vec<&'static str>);

    #[async_trait]
    impl NativeTranslator for Chunks {
        fn translate_streaming(&self, _text: &str) -> ChunkStream {
            stream::iter(self.0.clone().into_iter().map(|c| Ok(c.to_string()))).boxed()
        }
    }

    #[test]
    fn test_first_usable_language() {
        assert_eq!(first_usable_language(&[]), None);
        assert_eq!(
            first_usable_language(&[DetectionResult { detected_language: None, confidence: 0.9 }]),
            None
        );
        assert_eq!(first_usable_language(&[DetectionResult::new("  ", 0.9)]), None);
        assert_eq!(
            first_usable_language(&[DetectionResult::new("en", 0.9), DetectionResult::new("de", 0.1)]),
            Some("en".to_string())
        );
    }

    #[test]
    fn test_download_percentage() {
        assert_eq!(DownloadProgress { loaded: 0, total: 0 }.percentage(), None);
        assert_eq!(DownloadProgress { loaded: 1, total: 3 }.percentage(), Some(33));
        assert_eq!(DownloadProgress { loaded: 5, total: 4 }.percentage(), Some(100));
    }

    #[tokio::test]
    async fn test_batch_equals_concatenated_stream() {
        let translator = Chunks(vec!["Ho", "la", ", mun", "do"]);

        let streamed: Vec<String> = translator
            .translate_streaming("Hello, world")
            .map(|c| c.unwrap())
            .collect()
            .await;
        let batch = translator.translate("Hello, world").await.unwrap();

        assert_eq!(streamed.concat(), batch);
        assert_eq!(batch, "Hola, mundo");
    }

    #[tokio::test]
    async fn test_disabled_config_resolves_absent() {
        let config = NativeConfig {
            enabled: false,
            ..NativeConfig::default()
        };
        assert!(!CapabilityProvider::resolve(&config).await.is_available());
    }
}
