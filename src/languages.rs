//! Short language codes and the fallback model's namespace-qualified codes.
//!
//! The fallback model (NLLB family) expects FLORES-200 codes such as `spa_Latn`,
//! while callers and the native engine speak short codes such as `es`. This table
//! is the only place the two naming schemes meet.

use crate::error::{LexError, Result};

/// Short code every unmapped source language resolves to.
pub const ENGLISH: &str = "en";

const ENTRIES: &[(&str, &str)] = &[
    ("en", "eng_Latn"),
    ("es", "spa_Latn"),
    ("fr", "fra_Latn"),
    ("de", "deu_Latn"),
    ("ja", "jpn_Jpan"),
    ("uk", "ukr_Cyrl"),
    ("hi", "hin_Deva"),
];

/// Immutable short code -> model code mapping
#[derive(Debug, Clone, Copy)]
pub struct LanguageCodeTable {
    entries: &'static [(&'static str, &'static str)],
}

impl Default for LanguageCodeTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl LanguageCodeTable {
    /// The table shipped with the fallback model
    pub const fn standard() -> Self {
        Self { entries: ENTRIES }
    }

    /// Look up the model code for a short code, `None` on a miss
    pub fn lookup(&self, code: &str) -> Option<&'static str> {
        let key = normalize(code);
        self.entries
            .iter()
            .find(|(short, _)| *short == key)
            .map(|(_, model)| *model)
    }

    /// Model code of the English entry
    pub fn english(&self) -> &'static str {
        self.lookup(ENGLISH).unwrap_or("eng_Latn")
    }

    /// Resolve a source language. Absent or unknown sources become English.
    pub fn resolve_source(&self, code: Option<&str>) -> &'static str {
        code.and_then(|c| self.lookup(c))
            .unwrap_or_else(|| self.english())
    }

    /// Resolve a target language. Unknown targets are rejected.
    pub fn resolve_target(&self, code: &str) -> Result<&'static str> {
        self.lookup(code)
            .ok_or_else(|| LexError::UnsupportedTargetLanguage(code.to_string()))
    }

    pub fn supports(&self, code: &str) -> bool {
        self.lookup(code).is_some()
    }

    /// Short codes in table order
    pub fn short_codes(&self) -> impl Iterator<Item = &'static str> + use<> {
        self.entries.iter().map(|(short, _)| *short)
    }

    pub fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }
}

/// Trim, lower-case and keep only the primary subtag (`en-US` -> `en`)
pub fn normalize(code: &str) -> String {
    code.trim()
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// Human readable name for prompts and listings
pub fn language_name(code: &str) -> String {
    let name = match normalize(code).as_str() {
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "ja" => "Japanese",
        "uk" => "Ukrainian",
        "hi" => "Hindi",
        "ko" => "Korean",
        "zh" => "Chinese",
        "it" => "Italian",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "ar" => "Arabic",
        _ => return code.to_string(), // Fallback to the code itself if not found
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_targets_resolve_to_table_entries() {
        let table = LanguageCodeTable::standard();
        for (short, model) in table.entries() {
            assert_eq!(table.resolve_target(short).unwrap(), *model);
        }
        assert_eq!(table.resolve_target("es").unwrap(), "spa_Latn");
        assert_eq!(table.resolve_target("uk").unwrap(), "ukr_Cyrl");
    }

    #[test]
    fn test_unsupported_target_is_rejected() {
        let table = LanguageCodeTable::standard();
        let err = table.resolve_target("xx").unwrap_err();
        assert!(matches!(err, LexError::UnsupportedTargetLanguage(ref code) if code == "xx"));
        assert!(err.to_string().contains("\"xx\""));
    }

    #[test]
    fn test_source_defaults_to_english() {
        let table = LanguageCodeTable::standard();
        assert_eq!(table.resolve_source(None), "eng_Latn");
        assert_eq!(table.resolve_source(Some("xx")), "eng_Latn");
        assert_eq!(table.resolve_source(Some("")), "eng_Latn");
        assert_eq!(table.resolve_source(Some("ja")), "jpn_Jpan");
    }

    #[test]
    fn test_normalization() {
        let table = LanguageCodeTable::standard();
        assert_eq!(normalize(" en-US "), "en");
        assert_eq!(normalize("ZH_Hant"), "zh");
        assert_eq!(table.lookup("FR"), Some("fra_Latn"));
        assert_eq!(table.lookup("de-AT"), Some("deu_Latn"));
        assert!(!table.supports("zh-Hant"));
    }

    #[test]
    fn test_every_short_code_has_a_name() {
        let table = LanguageCodeTable::standard();
        for code in table.short_codes() {
            assert_ne!(language_name(code), code);
        }
        assert_eq!(language_name("xx"), "xx");
    }
}
