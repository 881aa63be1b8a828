use thiserror::Error;

#[derive(Error, Debug)]
pub enum LexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Language detection failed: {0}")]
    Detection(String),

    #[error("Native translation engine error: {0}")]
    Engine(String),

    #[error("The target language \"{0}\" is not supported by the fallback model map.")]
    UnsupportedTargetLanguage(String),

    #[error("Fallback executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("Model loading failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LexError>;
