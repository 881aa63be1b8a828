use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::languages::LanguageCodeTable;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate text, streaming the result to stdout
    Translate {
        /// Target language (defaults to the configured one)
        #[arg(short, long, value_parser = PossibleValuesParser::new(LanguageCodeTable::standard().short_codes()))]
        to: Option<String>,

        /// Skip the native engine and use the fallback model directly
        #[arg(long)]
        force_fallback: bool,

        /// Read the text from a file instead of the command line
        #[arg(short, long, conflicts_with = "text")]
        input: Option<PathBuf>,

        /// Text to translate (read from stdin when neither this nor --input is given)
        text: Option<String>,
    },

    /// Translate one document repeatedly, one target language per stdin line.
    /// A trailing '!' on a line forces the fallback model (e.g. "fr!").
    Session {
        /// Document to translate
        #[arg(short, long)]
        input: PathBuf,

        /// Force the fallback model for every line
        #[arg(long)]
        force_fallback: bool,
    },

    /// Detect the language of a text with the native engine
    Detect {
        /// Text to inspect
        text: String,
    },

    /// List the supported target languages
    Languages,

    /// Run the fallback executor over stdin/stdout (NDJSON envelopes)
    Worker,

    /// Write a configuration file with default values
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "lexbridge.toml")]
        output: PathBuf,
    },
}

/// Parse one session line into a target language and a force-fallback flag
pub fn parse_session_line(line: &str) -> Option<(String, bool)> {
    let line = line.trim();
    let (target, forced) = match line.strip_suffix('!') {
        Some(target) => (target.trim(), true),
        None => (line, false),
    };
    if target.is_empty() {
        None
    } else {
        Some((target.to_string(), forced))
    }
}
