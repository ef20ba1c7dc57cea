//! Classifier: sender policy and pattern rules combined with fixed precedence.
//!
//! 1. automated sender or auto-reply → `Skip`
//! 2. always-notify sender → `NeedsInput`
//! 3. any escalate rule on the configured text window → `NeedsInput`
//! 4. any enabled auto-safe rule on the newest message → `AutoRespond`
//! 5. anything else → `NeedsInput`
//!
//! First match wins. Ambiguity always escalates.

use std::collections::BTreeSet;

use tracing::debug;

use crate::config::{TextWindow, TriageConfig};
use crate::error::ConfigError;
use crate::pipeline::rules::{RuleGroup, RuleTable, tag_category};
use crate::pipeline::sender::{SenderPolicy, SenderVerdict};
use crate::pipeline::types::{EscalationKind, Item, Verdict};

/// Tag recorded when an always-notify sender forces escalation.
pub const ALWAYS_NOTIFY_TAG: &str = "sender.always_notify";
/// Tag recorded when nothing matched and the safe default applied.
pub const DEFAULT_TAG: &str = "default.unrecognized";

const MAX_SUMMARY_CHARS: usize = 200;

pub struct Classifier {
    rules: RuleTable,
    sender_policy: SenderPolicy,
    auto_safe_categories: BTreeSet<String>,
    text_window: TextWindow,
}

impl Classifier {
    pub fn new(
        rules: RuleTable,
        sender_policy: SenderPolicy,
        auto_safe_categories: BTreeSet<String>,
        text_window: TextWindow,
    ) -> Self {
        Self {
            rules,
            sender_policy,
            auto_safe_categories,
            text_window,
        }
    }

    /// Built-in rules plus configured escalations, policy and window.
    pub fn from_config(config: &TriageConfig) -> Result<Self, ConfigError> {
        let rules =
            RuleTable::default_rules()?.with_custom_escalations(&config.extra_escalate_patterns)?;
        Ok(Self::new(
            rules,
            SenderPolicy::new(&config.always_notify),
            config.auto_safe_categories.clone(),
            config.text_window,
        ))
    }

    pub fn classify(&self, item: &Item) -> Verdict {
        // 1 + 2: sender policy
        match self
            .sender_policy
            .evaluate(&item.sender, &item.subject, item.latest_body())
        {
            SenderVerdict::SkipSilent(reason) => {
                return Verdict::Skip {
                    tags: BTreeSet::from([reason.tag().to_string()]),
                    reason: reason.description().to_string(),
                };
            }
            SenderVerdict::AlwaysEscalate => {
                return Verdict::NeedsInput {
                    tags: BTreeSet::from([ALWAYS_NOTIFY_TAG.to_string()]),
                    kind: EscalationKind::Input,
                    summary: extract_question(item.latest_body()),
                };
            }
            SenderVerdict::Normal => {}
        }

        // 3: escalate rules
        let window_text = match self.text_window {
            TextWindow::LatestMessage => item.latest_text(),
            TextWindow::FullThread => item.thread_text(),
        };
        let escalate = self.rules.matches_group(RuleGroup::Escalate, &window_text);
        if !escalate.is_empty() {
            let kind = escalation_kind(&escalate);
            debug!(item_id = %item.id, ?kind, tags = ?escalate, "Escalate rules matched");
            return Verdict::NeedsInput {
                tags: escalate,
                kind,
                summary: extract_question(item.latest_body()),
            };
        }

        // 4: enabled auto-safe rules on the newest message
        let auto_safe = self
            .rules
            .matches_group(RuleGroup::AutoSafe, &item.latest_text());
        let (enabled, disabled): (BTreeSet<String>, BTreeSet<String>) = auto_safe
            .into_iter()
            .partition(|tag| {
                tag_category(tag).is_some_and(|c| self.auto_safe_categories.contains(c))
            });
        if !enabled.is_empty() {
            return Verdict::AutoRespond { tags: enabled };
        }

        // 5: safe default
        let mut tags = disabled;
        tags.insert(DEFAULT_TAG.to_string());
        Verdict::NeedsInput {
            tags,
            kind: EscalationKind::Input,
            summary: extract_question(item.latest_body()),
        }
    }
}

/// Sensitive, money, commitment and custom rules need approval; choice rules need a pick.
fn escalation_kind(tags: &BTreeSet<String>) -> EscalationKind {
    let categories: BTreeSet<&str> = tags.iter().filter_map(|t| tag_category(t)).collect();
    if ["sensitive", "money", "commitment", "custom"]
        .iter()
        .any(|c| categories.contains(c))
    {
        EscalationKind::Approval
    } else if categories.contains("choice") {
        EscalationKind::Choice
    } else {
        EscalationKind::Input
    }
}

/// First sentence of `body` that ends with a question mark.
fn extract_question(body: &str) -> Option<String> {
    let mut current = String::new();
    for ch in body.chars() {
        match ch {
            '?' => {
                current.push('?');
                let sentence = current.trim();
                if sentence.len() > 1 {
                    return Some(sentence.chars().take(MAX_SUMMARY_CHARS).collect());
                }
                current.clear();
            }
            '.' | '!' | '\n' => current.clear(),
            _ => current.push(ch),
        }
    }
    None
}
