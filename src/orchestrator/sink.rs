use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::warn;

/// Which path produced a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationPath {
    Native,
    Fallback,
}

/// Visible progress of one translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationStatus {
    Detecting,
    PreparingModel,
    Downloading { percent: u8 },
    Streaming,
    FallingBack { reason: String },
    LoadingModel,
    Translating,
    Completed { path: TranslationPath },
    Failed { message: String },
}

impl TranslationStatus {
    pub fn describe(&self) -> String {
        match self {
            Self::Detecting => "Detecting language...".to_string(),
            Self::PreparingModel => "Preparing model...".to_string(),
            Self::Downloading { percent } => format!("Downloading: {}%", percent),
            Self::Streaming => "Translating...".to_string(),
            Self::FallingBack { reason } => format!("Using fallback translator ({})", reason),
            Self::LoadingModel => "Loading fallback model...".to_string(),
            Self::Translating => "Translating with fallback model...".to_string(),
            Self::Completed { .. } => "Done".to_string(),
            Self::Failed { message } => format!("Translation failed: {}", message),
        }
    }
}

/// Where translated text ends up. The id keys the remembered original text.
pub trait OutputSink: Send + Sync {
    fn id(&self) -> &str;

    fn text(&self) -> String;

    /// Replace the whole content
    fn set_text(&self, text: &str);

    /// Append one streamed chunk
    fn append(&self, chunk: &str);

    fn status(&self, _status: &TranslationStatus) {}
}

/// Keeps text and statuses in memory
pub struct MemorySink {
    id: String,
    text: Mutex<String>,
    replacements: Mutex<Vec<String>>,
    statuses: Mutex<Vec<TranslationStatus>>,
}

impl MemorySink {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Mutex::new(text.into()),
            replacements: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
        }
    }

    pub fn statuses(&self) -> Vec<TranslationStatus> {
        lock(&self.statuses).clone()
    }

    /// Every value passed to `set_text`, oldest first
    pub fn replacements(&self) -> Vec<String> {
        lock(&self.replacements).clone()
    }
}

impl OutputSink for MemorySink {
    fn id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> String {
        lock(&self.text).clone()
    }

    fn set_text(&self, text: &str) {
        *lock(&self.text) = text.to_string();
        lock(&self.replacements).push(text.to_string());
    }

    fn append(&self, chunk: &str) {
        lock(&self.text).push_str(chunk);
    }

    fn status(&self, status: &TranslationStatus) {
        lock(&self.statuses).push(status.clone());
    }
}

/// Terminal output: streamed chunks go to stdout as they arrive,
/// statuses to a spinner on stderr
pub struct ConsoleSink {
    id: String,
    text: Mutex<String>,
    streamed: Mutex<bool>,
    spinner: Mutex<Option<ProgressBar>>,
}

impl ConsoleSink {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Mutex::new(text.into()),
            streamed: Mutex::new(false),
            spinner: Mutex::new(None),
        }
    }

    /// Whether the current text has already been printed chunk by chunk
    pub fn streamed(&self) -> bool {
        *lock(&self.streamed)
    }

    fn show(&self, message: String) {
        let mut spinner = lock(&self.spinner);
        let bar = spinner.get_or_insert_with(|| {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        });
        bar.set_message(message);
    }

    fn clear(&self) {
        if let Some(bar) = lock(&self.spinner).take() {
            bar.finish_and_clear();
        }
    }
}

impl OutputSink for ConsoleSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> String {
        lock(&self.text).clone()
    }

    fn set_text(&self, text: &str) {
        let mut streamed = lock(&self.streamed);
        if *streamed && !lock(&self.text).is_empty() {
            // Partial streamed output stays on screen; start the next one on a fresh line
            println!();
            warn!("Discarding partially streamed output");
        }
        *streamed = false;
        *lock(&self.text) = text.to_string();
    }

    fn append(&self, chunk: &str) {
        self.clear();
        *lock(&self.streamed) = true;
        lock(&self.text).push_str(chunk);

        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(chunk.as_bytes()).and_then(|_| stdout.flush()) {
            warn!("Failed to write streamed chunk: {}", e);
        }
    }

    fn status(&self, status: &TranslationStatus) {
        match status {
            TranslationStatus::Streaming
            | TranslationStatus::Completed { .. }
            | TranslationStatus::Failed { .. } => self.clear(),
            other => self.show(other.describe()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_tracks_text_and_statuses() {
        let sink = MemorySink::new("doc", "Hello");
        assert_eq!(sink.id(), "doc");
        assert_eq!(sink.text(), "Hello");

        sink.set_text("");
        sink.append("Ho");
        sink.append("la");
        sink.status(&TranslationStatus::Streaming);

        assert_eq!(sink.text(), "Hola");
        assert_eq!(sink.replacements(), vec![String::new()]);
        assert_eq!(sink.statuses(), vec![TranslationStatus::Streaming]);
    }

    #[test]
    fn test_status_descriptions() {
        assert_eq!(TranslationStatus::Downloading { percent: 42 }.describe(), "Downloading: 42%");
        assert_eq!(TranslationStatus::PreparingModel.describe(), "Preparing model...");
        assert!(TranslationStatus::Failed { message: "boom".to_string() }
            .describe()
            .contains("boom"));
    }

    #[test]
    fn test_console_sink_resets_stream_flag_on_replace() {
        let sink = ConsoleSink::new("stdin", "Hello");
        sink.set_text("");
        sink.append("Ho");
        assert!(sink.streamed());

        sink.set_text("Hello");
        assert!(!sink.streamed());
        assert_eq!(sink.text(), "Hello");
    }
}
