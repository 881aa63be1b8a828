use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{LexError, Result};
use crate::languages::LanguageCodeTable;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub native: NativeConfig,
    pub fallback: FallbackConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeConfig {
    /// Try the native engine at all
    pub enabled: bool,
    /// Ollama endpoint URL
    pub endpoint: String,
    /// Model used for streaming translation
    pub model: String,
    /// Model used for language detection (empty = same as `model`)
    pub detection_model: String,
    /// Pull the model when the server does not have it yet
    pub auto_pull: bool,
    /// Seconds allowed to establish a connection
    pub connect_timeout_secs: u64,
    /// Seconds allowed for non-streaming requests (probe, detection, model check)
    pub request_timeout_secs: u64,
    /// Seconds a streaming translation may go without output before it fails
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Path to the translation command (an NLLB CLI or compatible wrapper)
    pub binary_path: String,
    /// Model path or hub id passed as `--model`
    pub model: String,
    /// Additional arguments appended to every inference call
    pub extra_args: Vec<String>,
    /// Send a preload command at startup even when the native engine is available
    pub preload_on_startup: bool,
    /// Capacity of the executor's command channel
    pub command_buffer: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Target language used when none is given on the command line
    pub default_target_language: String,
    /// Text left in the output when a translation fails for good
    pub error_placeholder: String,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama3.2:3b".to_string(),
            detection_model: String::new(),
            auto_pull: false,
            connect_timeout_secs: 5,
            request_timeout_secs: 60,
            stream_idle_timeout_secs: 30,
        }
    }
}

impl NativeConfig {
    pub fn detection_model(&self) -> &str {
        if self.detection_model.trim().is_empty() {
            &self.model
        } else {
            &self.detection_model
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            binary_path: "nllb-translate".to_string(),
            model: "facebook/nllb-200-distilled-600M".to_string(),
            extra_args: vec![
                // Example options users can customize:
                // "--device".to_string(), "cpu".to_string(),
                // "--beam-size".to_string(), "4".to_string(),
            ],
            preload_on_startup: false,
            command_buffer: 32,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_target_language: "es".to_string(),
            error_placeholder: "[Translation Error]".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LexError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| LexError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LexError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| LexError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings the fallback path could never serve
    pub fn validate(&self) -> Result<()> {
        let table = LanguageCodeTable::standard();
        let target = &self.orchestrator.default_target_language;
        if !table.supports(target) {
            return Err(LexError::Config(format!(
                "default_target_language '{}' is not one of: {}",
                target,
                table.short_codes().collect::<Vec<_>>().join(", ")
            )));
        }
        if self.native.stream_idle_timeout_secs == 0 {
            return Err(LexError::Config("native.stream_idle_timeout_secs must be at least 1".to_string()));
        }
        if self.fallback.command_buffer == 0 {
            return Err(LexError::Config("fallback.command_buffer must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexbridge.toml");

        let mut config = Config::default();
        config.native.auto_pull = true;
        config.fallback.extra_args = vec!["--device".to_string(), "cpu".to_string()];
        config.orchestrator.default_target_language = "ja".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(loaded.native.auto_pull);
        assert_eq!(loaded.fallback.extra_args, vec!["--device", "cpu"]);
        assert_eq!(loaded.orchestrator.default_target_language, "ja");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[native]\nenabled = false\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert!(!loaded.native.enabled);
        assert_eq!(loaded.native.endpoint, "http://localhost:11434");
        assert_eq!(loaded.native.stream_idle_timeout_secs, 30);
        assert_eq!(loaded.fallback.command_buffer, 32);
        assert_eq!(loaded.orchestrator.error_placeholder, "[Translation Error]");
    }

    #[test]
    fn test_unsupported_default_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[orchestrator]\ndefault_target_language = \"xx\"\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, LexError::Config(ref msg) if msg.contains("'xx'")));
    }

    #[test]
    fn test_detection_model_defaults_to_translation_model() {
        let mut native = NativeConfig::default();
        assert_eq!(native.detection_model(), "llama3.2:3b");
        native.detection_model = "qwen2.5:0.5b".to_string();
        assert_eq!(native.detection_model(), "qwen2.5:0.5b");
    }
}
