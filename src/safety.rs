//! Safety layer: prompt-injection filtering and log redaction.
//!
//! Email content is attacker-controlled. Before any of it reaches the
//! drafting model it goes through [`sanitize_for_prompt`]; before sender
//! addresses or bodies reach an info-level log line they go through
//! [`redact_for_logging`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

/// Maximum subject length passed to the drafting model.
pub const MAX_SUBJECT_CHARS: usize = 500;
/// Maximum body length passed to the drafting model.
pub const MAX_BODY_CHARS: usize = 10_000;
/// Maximum length of one earlier thread message in a prompt.
pub const MAX_THREAD_MESSAGE_CHARS: usize = 2_000;

const FILTERED: &str = "[FILTERED]";
const TRUNCATED: &str = "... [TRUNCATED]";

const INJECTION_PATTERNS: &[&str] = &[
    // instruction override
    r"ignore\s+(all\s+)?(previous\s+|prior\s+)?instructions?",
    r"disregard\s+(the\s+)?(above|previous|prior)",
    r"forget\s+(all\s+)?(previous\s+|prior\s+)?instructions?",
    r"override\s+(all\s+)?(previous\s+|prior\s+)?instructions?",
    r"skip\s+(all\s+)?(previous\s+|prior\s+)?instructions?",
    // injected instructions
    r"new\s+instructions?:",
    r"updated\s+instructions?:",
    r"system\s+prompt:",
    r"admin\s+override:",
    r"developer\s+mode:",
    // role manipulation
    r"you\s+are\s+now\s+a",
    r"act\s+as\s+(a\s+)?different",
    r"pretend\s+(you\s+are|to\s+be)",
    r"switch\s+to\s+.+\s+mode",
    // output manipulation
    r"respond\s+with\s+only",
    r"output\s+only",
    r"just\s+say",
    r"reply\s+with\s+exactly",
    // exfiltration
    r"list\s+all\s+(your\s+)?instructions",
    r"show\s+(me\s+)?(your\s+)?system\s+prompt",
    r"reveal\s+(your\s+)?configuration",
    r"what\s+are\s+your\s+instructions",
    // jailbreaks
    r"dan\s+mode",
    r"jailbreak",
    r"bypass\s+(safety|filter|restriction)",
];

static INJECTION_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    INJECTION_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect()
});

static EXCESS_NEWLINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());
static EXCESS_SPACES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r" {3,}").ok());

struct Redaction {
    regex: Option<Regex>,
    replacement: &'static str,
}

static REDACTIONS: LazyLock<Vec<Redaction>> = LazyLock::new(|| {
    [
        // keep the domain for debugging
        (r"[a-zA-Z0-9._%+-]+@([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})", "[EMAIL]@$1"),
        (r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b", "[CARD]"),
        (r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b", "[PHONE]"),
        (r"\b(sk-|api[_-]?key[=:]\s*)[a-zA-Z0-9]{20,}\b", "[API_KEY]"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| Redaction {
        regex: Regex::new(pattern).ok(),
        replacement,
    })
    .collect()
});

/// Neutralise prompt-injection phrasing, collapse layout tricks and cap length.
pub fn sanitize_for_prompt(text: &str, max_chars: Option<usize>) -> String {
    if text.is_empty() {
        return String::new();
    }

    let mut sanitized = text.to_string();
    let mut injection_detected = false;
    for regex in INJECTION_REGEXES.iter() {
        if regex.is_match(&sanitized) {
            injection_detected = true;
            sanitized = regex.replace_all(&sanitized, FILTERED).into_owned();
        }
    }
    if injection_detected {
        warn!(
            original_len = text.len(),
            "Potential prompt injection filtered from email content"
        );
    }

    if let Some(re) = EXCESS_NEWLINES.as_ref() {
        sanitized = re.replace_all(&sanitized, "\n\n").into_owned();
    }
    if let Some(re) = EXCESS_SPACES.as_ref() {
        sanitized = re.replace_all(&sanitized, "  ").into_owned();
    }

    if let Some(max) = max_chars
        && sanitized.chars().count() > max
    {
        let mut cut: String = sanitized.chars().take(max).collect();
        cut.push_str(TRUNCATED);
        debug!(from = text.len(), to = max, "Prompt text truncated");
        sanitized = cut;
    }

    sanitized
}

/// Mask addresses, card numbers, phone numbers and API keys.
pub fn redact_for_logging(text: &str) -> String {
    let mut redacted = text.to_string();
    for r in REDACTIONS.iter() {
        if let Some(regex) = &r.regex {
            redacted = regex.replace_all(&redacted, r.replacement).into_owned();
        }
    }
    redacted
}
