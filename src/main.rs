//! Lexbridge - Dual-path text translation
//!
//! Entry point: loads configuration, resolves the native engine, starts the
//! fallback executor and dispatches the requested command.

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tracing::{info, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lexbridge::cli::{parse_session_line, Args, Commands};
use lexbridge::config::Config;
use lexbridge::executor::{stdio, CommandModelLoader, ExecutorHandle, ModelLoader};
use lexbridge::languages::{language_name, LanguageCodeTable};
use lexbridge::native::CapabilityProvider;
use lexbridge::orchestrator::{
    ConsoleSink, Orchestrator, OutputSink, TranslationOutcome, TranslationRequest,
};

const DEFAULT_CONFIG_FILE: &str = "lexbridge.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(args.verbose)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Languages => {
            println!("{:<6} {:<12} {:<20}", "Code", "Model code", "Language");
            println!("{}", "-".repeat(40));
            for (short, model) in LanguageCodeTable::standard().entries() {
                println!("{:<6} {:<12} {:<20}", short, model, language_name(short));
            }
        }
        Commands::InitConfig { output } => {
            Config::default().save_to_file(&output)?;
            println!("Configuration written to {}", output.display());
        }
        Commands::Worker => {
            let loader: Arc<dyn ModelLoader> = Arc::new(CommandModelLoader::new(config.fallback.clone())?);
            stdio::serve_stdio(loader, config.fallback.command_buffer).await?;
        }
        Commands::Detect { text } => {
            let capabilities = CapabilityProvider::resolve(&config.native).await;
            let Some(native) = capabilities.capabilities() else {
                anyhow::bail!("Native engine is not available, cannot detect languages");
            };
            for result in native.detector.detect(&text).await? {
                let language = result.detected_language.unwrap_or_else(|| "unknown".to_string());
                println!("{:<8} {:.2}", language, result.confidence);
            }
        }
        Commands::Translate { to, force_fallback, input, text } => {
            let text = match (text, input) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await?,
                (None, None) => {
                    let mut buffer = String::new();
                    tokio::io::stdin().read_to_string(&mut buffer).await?;
                    buffer
                }
            };
            let target = to.unwrap_or_else(|| config.orchestrator.default_target_language.clone());

            let orchestrator = build_orchestrator(&config).await;
            let sink = ConsoleSink::new("input", text.clone());
            let request = TranslationRequest::new(text, target, force_fallback);
            let outcome = orchestrator.translate(&request, &sink).await;
            finish(&sink, outcome)?;
        }
        Commands::Session { input, force_fallback } => {
            let text = tokio::fs::read_to_string(&input).await?;
            let orchestrator = build_orchestrator(&config).await;
            let sink = ConsoleSink::new(input.display().to_string(), text);

            eprintln!("Enter one target language per line ({})", supported_codes());
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let Some((target, forced)) = parse_session_line(&line) else {
                    continue;
                };
                let outcome = orchestrator
                    .translate_target(&sink, &target, force_fallback || forced)
                    .await;
                if let Err(e) = finish(&sink, outcome) {
                    eprintln!("{}", e);
                }
            }
        }
    }

    Ok(())
}

async fn build_orchestrator(config: &Config) -> Orchestrator {
    let executor = CommandModelLoader::new(config.fallback.clone())
        .and_then(|loader| ExecutorHandle::spawn(Arc::new(loader), config.fallback.command_buffer));
    let capabilities = CapabilityProvider::resolve(&config.native).await;

    let orchestrator = Orchestrator::new(capabilities, executor, config.orchestrator.clone())
        .with_preload_on_startup(config.fallback.preload_on_startup);
    orchestrator.warm_up().await;
    orchestrator
}

/// Print whatever the console has not shown yet and map failures to an error exit
fn finish(sink: &ConsoleSink, outcome: TranslationOutcome) -> Result<()> {
    if sink.streamed() {
        println!();
    } else {
        println!("{}", sink.text());
    }

    match outcome {
        TranslationOutcome::Completed { path, .. } => {
            info!("Translated via {:?} path", path);
            Ok(())
        }
        TranslationOutcome::Failed { message } => Err(anyhow::anyhow!("Translation failed: {}", message)),
        TranslationOutcome::Superseded => Ok(()),
    }
}

fn supported_codes() -> String {
    LanguageCodeTable::standard().short_codes().collect::<Vec<_>>().join(", ")
}

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".lexbridge").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "lexbridge.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Console output goes to stderr; stdout carries translations and worker responses
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized - console: {}, file: {}",
          log_level, log_dir.join("lexbridge.log").display());

    Ok(())
}
