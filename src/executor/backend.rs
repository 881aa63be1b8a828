use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::FallbackConfig;
use crate::error::{LexError, Result};

/// A loaded fallback model. Codes passed in are already model codes (`spa_Latn`).
#[async_trait]
pub trait TranslationModel: Send + Sync {
    async fn run_inference(&self, text: &str, source: &str, target: &str) -> Result<String>;
}

/// Produces the model handle. Called at most once per successful load.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn TranslationModel>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Loader for an external translation command (an NLLB CLI or similar)
pub struct CommandModelLoader {
    config: FallbackConfig,
}

impl CommandModelLoader {
    pub fn new(config: FallbackConfig) -> Result<Self> {
        if config.binary_path.trim().is_empty() {
            return Err(LexError::Config("fallback.binary_path is empty".to_string()));
        }
        if config.model.trim().is_empty() {
            return Err(LexError::Config("fallback.model is empty".to_string()));
        }
        Ok(Self { config })
    }
}

#[async_trait]
impl ModelLoader for CommandModelLoader {
    async fn load(&self) -> Result<Arc<dyn TranslationModel>> {
        info!("Loading fallback model {} via {}", self.config.model, self.config.binary_path);

        // Models given as paths must exist; anything else is treated as a hub id
        let model_path = Path::new(&self.config.model);
        if model_path.is_absolute() || self.config.model.starts_with('.') {
            if !model_path.exists() {
                return Err(LexError::ModelLoad(format!(
                    "Model not found: {}",
                    model_path.display()
                )));
            }
        }

        let output = Command::new(&self.config.binary_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                LexError::ModelLoad(format!(
                    "Failed to execute {}: {}",
                    self.config.binary_path, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LexError::ModelLoad(format!(
                "{} --version failed: {}",
                self.config.binary_path,
                stderr.trim()
            )));
        }

        debug!(
            "Translation command version: {}",
            String::from_utf8_lossy(&output.stdout).trim()
        );

        Ok(Arc::new(CommandModel {
            binary_path: self.config.binary_path.clone(),
            model: self.config.model.clone(),
            extra_args: self.config.extra_args.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.config.model, self.config.binary_path)
    }
}

/// Runs one process per inference: text on stdin, translation on stdout
pub struct CommandModel {
    binary_path: String,
    model: String,
    extra_args: Vec<String>,
}

impl CommandModel {
    fn command(&self, source: &str, target: &str) -> Command {
        let mut cmd = Command::new(&self.binary_path);
        cmd.arg("--model").arg(&self.model)
           .arg("--src-lang").arg(source)
           .arg("--tgt-lang").arg(target)
           .args(&self.extra_args)
           .stdin(Stdio::piped())
           .stdout(Stdio::piped())
           .stderr(Stdio::piped())
           .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TranslationModel for CommandModel {
    async fn run_inference(&self, text: &str, source: &str, target: &str) -> Result<String> {
        let mut cmd = self.command(source, target);
        debug!("Executing translation command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            LexError::Inference(format!("Failed to execute {}: {}", self.binary_path, e))
        })?;

        // stdin is written while stdout drains; a command may answer before reading all input
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(text.as_bytes()).await?;
                // Dropping stdin closes the pipe so the command sees EOF
            }
            Ok::<_, std::io::Error>(())
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(LexError::Inference(format!(
                "Translation command failed ({}): {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Err(e) = fed {
            return Err(LexError::Inference(format!(
                "Failed to send text to translation command: {} (stderr: {})",
                e,
                stderr.trim()
            )));
        }

        let translated = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if translated.is_empty() {
            return Err(LexError::Inference("Empty translation received".to_string()));
        }
        Ok(translated)
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes `[src->tgt] text`, fails when the text is "fail"
    pub struct EchoModel {
        pub inferences: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TranslationModel for EchoModel {
        async fn run_inference(&self, text: &str, source: &str, target: &str) -> Result<String> {
            self.inferences.fetch_add(1, Ordering::SeqCst);
            if text == "fail" {
                return Err(LexError::Inference("model exploded".to_string()));
            }
            Ok(format!("[{}->{}] {}", source, target, text))
        }
    }

    /// Counts loads; sleeps to widen the loading window; fails the first
    /// `failures` attempts
    pub struct CountingLoader {
        pub loads: Arc<AtomicUsize>,
        pub inferences: Arc<AtomicUsize>,
        pub delay: Duration,
        pub failures: usize,
    }

    impl CountingLoader {
        pub fn new(delay: Duration) -> Self {
            Self {
                loads: Arc::new(AtomicUsize::new(0)),
                inferences: Arc::new(AtomicUsize::new(0)),
                delay,
                failures: 0,
            }
        }

        pub fn failing(mut self, failures: usize) -> Self {
            self.failures = failures;
            self
        }
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self) -> Result<Arc<dyn TranslationModel>> {
            let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if attempt < self.failures {
                return Err(LexError::ModelLoad("weights unavailable".to_string()));
            }
            Ok(Arc::new(EchoModel {
                inferences: Arc::clone(&self.inferences),
            }))
        }

        fn describe(&self) -> String {
            "counting-loader".to_string()
        }
    }
}
