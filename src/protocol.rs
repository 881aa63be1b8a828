//! Messages exchanged between the orchestrator and the fallback executor.
//!
//! The bodies serialize to the executor wire schema:
//!
//! ```text
//! { "type": "PRELOAD" }
//! { "type": "TRANSLATE", "text": "...", "sourceLanguage": "en" | null, "targetLanguage": "es" }
//! { "status": "loading-model" } | { "status": "translating" }
//! { "status": "success", "translatedText": "..." } | { "status": "error", "message": "..." }
//! ```
//!
//! Every body travels inside an [`Envelope`] that adds a `requestId` field at the
//! same level, so responses can be routed back to the request that caused them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic identifier attached to every command and its responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Command sent to the fallback executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    /// Start loading the model without waiting for it
    Preload,
    Translate {
        text: String,
        #[serde(rename = "sourceLanguage")]
        source_language: Option<String>,
        #[serde(rename = "targetLanguage")]
        target_language: String,
    },
}

/// Response emitted by the fallback executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum WorkerResponse {
    LoadingModel,
    Translating,
    Success {
        #[serde(rename = "translatedText")]
        translated_text: String,
    },
    Error {
        message: String,
    },
}

impl WorkerResponse {
    /// Success and Error end a request; nothing follows them
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A message body tagged with the id of the request it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn new(request_id: RequestId, body: T) -> Self {
        Self { request_id, body }
    }
}
