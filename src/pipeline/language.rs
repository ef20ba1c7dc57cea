//! Keyword-based language detection for reply composition.

use std::sync::LazyLock;

use regex::Regex;

/// Fallback when no indicator matches.
pub const DEFAULT_LANGUAGE: &str = "en";

/// (ISO code, indicator patterns), checked in order.
const INDICATORS: &[(&str, &[&str])] = &[
    (
        "es",
        &[
            r"\b(hola|gracias|buenos|buenas|saludos|atentamente)\b",
            r"\b(por favor|estimado|querido)\b",
        ],
    ),
    (
        "fr",
        &[
            r"\b(bonjour|merci|salut|cordialement|bonsoir)\b",
            r"\b(s'il vous plaît|cher|chère)\b",
        ],
    ),
    (
        "de",
        &[
            r"\b(hallo|danke|guten|vielen dank|freundliche)\b",
            r"\b(bitte|liebe|lieber)\b",
        ],
    ),
    (
        "pt",
        &[
            r"\b(olá|obrigado|obrigada|bom dia|boa tarde)\b",
            r"\b(prezado|prezada)\b",
        ],
    ),
    (
        "it",
        &[
            r"\b(ciao|grazie|buongiorno|saluti|cordiali)\b",
            r"\b(per favore|gentile|caro|cara)\b",
        ],
    ),
];

static COMPILED: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    INDICATORS
        .iter()
        .map(|(lang, patterns)| {
            let regexes = patterns
                .iter()
                .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
                .collect();
            (*lang, regexes)
        })
        .collect()
});

/// Best-guess ISO 639-1 code for `text`. Defaults to English.
pub fn detect_language(text: &str) -> &'static str {
    COMPILED
        .iter()
        .find(|(_, regexes)| regexes.iter().any(|re| re.is_match(text)))
        .map(|(lang, _)| *lang)
        .unwrap_or(DEFAULT_LANGUAGE)
}

/// English name for a language code, used in drafting prompts.
pub fn language_name(code: &str) -> &'static str {
    match code {
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        "it" => "Italian",
        _ => "English",
    }
}
