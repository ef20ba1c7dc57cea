//! Per-contact writing style, learned from replies we actually sent.
//!
//! Analysis is keyword-heuristic. Each new sample is merged into the stored
//! profile with a 0.3 weight so one odd reply does not flip the style.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Profiles untouched for this long are treated as absent.
pub const CONTACT_TTL_DAYS: i64 = 180;

const NEW_WEIGHT: f64 = 0.3;
const OLD_WEIGHT: f64 = 0.7;
const CASUAL_BELOW: f64 = 0.4;
const FORMAL_ABOVE: f64 = 0.6;
const MAX_GREETING_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Formal,
    Casual,
    Mixed,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Formal => "formal",
            Self::Casual => "casual",
            Self::Mixed => "mixed",
        }
    }

    fn from_formality(score: f64) -> Option<Self> {
        if score < CASUAL_BELOW {
            Some(Self::Casual)
        } else if score > FORMAL_ABOVE {
            Some(Self::Formal)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyLength {
    /// One or two sentences.
    Short,
    /// Three to five sentences.
    Medium,
    Long,
}

impl ReplyLength {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        }
    }

    fn from_sentences(count: usize) -> Self {
        match count {
            0..=2 => Self::Short,
            3..=5 => Self::Medium,
            _ => Self::Long,
        }
    }
}

/// Style hints handed to the drafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleHints {
    pub tone: Tone,
    pub greeting: Option<String>,
    /// 0.0 (very casual) to 1.0 (very formal).
    pub formality: f64,
    pub typical_length: ReplyLength,
    pub sample_count: u32,
}

impl StyleHints {
    /// Fold a fresh sample into the running profile.
    pub fn merge(&self, sample: &StyleHints) -> StyleHints {
        if self.sample_count == 0 {
            return StyleHints {
                sample_count: 1,
                ..sample.clone()
            };
        }
        let formality = OLD_WEIGHT * self.formality + NEW_WEIGHT * sample.formality;
        let formality = (formality * 100.0).round() / 100.0;
        StyleHints {
            tone: Tone::from_formality(formality).unwrap_or(self.tone),
            greeting: sample.greeting.clone().or_else(|| self.greeting.clone()),
            formality,
            typical_length: sample.typical_length,
            sample_count: self.sample_count.saturating_add(1),
        }
    }
}

/// Stored memory for one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactProfile {
    /// Lowercased bare address.
    pub email: String,
    pub style: StyleHints,
    pub updated_at: DateTime<Utc>,
}

impl ContactProfile {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at > Duration::days(CONTACT_TTL_DAYS)
    }
}

static FORMAL_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bdear\b",
        r"\b(kind|best|warm)\s+regards\b",
        r"\bsincerely\b",
        r"\bkindly\b",
        r"\bplease\s+find\b",
        r"\bi\s+would\s+be\b",
        r"\bcould\s+you\s+please\b",
        r"\bthank\s+you\b",
    ])
});

static CASUAL_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r"\bhey\b",
        r"\bcheers\b",
        r"\bthanks!",
        r"\b(lol|haha|btw)\b",
        r"\b(gonna|wanna|gotta)\b",
        r"[:;]-?\)",
        r"\b\w+'(s|re|ll|ve|d|m|t)\b",
    ])
});

static GREETING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^(hi|hello|hey|dear|good\s+(morning|afternoon|evening)|greetings)\b").ok()
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect()
}

/// Heuristic style sample for one sent reply.
pub fn analyze(body: &str) -> StyleHints {
    let formal = FORMAL_MARKERS.iter().filter(|re| re.is_match(body)).count() as f64;
    let casual = CASUAL_MARKERS.iter().filter(|re| re.is_match(body)).count() as f64;
    let formality = (0.5 + 0.15 * formal - 0.15 * casual).clamp(0.0, 1.0);

    let greeting = body
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .filter(|l| l.chars().count() <= MAX_GREETING_CHARS)
        .filter(|l| GREETING.as_ref().is_some_and(|re| re.is_match(l)))
        .map(str::to_string);

    let sentences = body
        .split(['.', '!', '?'])
        .filter(|s| s.split_whitespace().count() >= 2)
        .count();

    StyleHints {
        tone: Tone::from_formality(formality).unwrap_or(Tone::Mixed),
        greeting,
        formality,
        typical_length: ReplyLength::from_sentences(sentences),
        sample_count: 1,
    }
}
