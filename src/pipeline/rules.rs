//! Pattern matcher: text in, matched rule tags out.
//!
//! Rules are case-insensitive regexes split into two groups:
//! - `escalate`: choices, money, commitments, sensitive matters → a human decides
//! - `auto_safe`: meeting, acknowledgment, scheduling, follow-up, status phrasing
//!
//! Matching is pure. Every matching rule is reported, and the result is a
//! sorted set so the same text and table always give the same output.
//! Tags read `<group>.<category>.<rule>`, e.g. `escalate.money.usd_amount`.

use std::collections::BTreeSet;

use regex::Regex;
use tracing::debug;

use crate::error::ConfigError;

/// Auto-safe categories enabled unless configuration says otherwise.
pub const DEFAULT_AUTO_SAFE_CATEGORIES: &[&str] =
    &["meeting", "acknowledgment", "scheduling", "follow_up"];

/// Category used for escalate patterns supplied through configuration.
pub const CUSTOM_CATEGORY: &str = "custom";

/// Which group a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RuleGroup {
    Escalate,
    AutoSafe,
}

impl RuleGroup {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Escalate => "escalate",
            Self::AutoSafe => "auto_safe",
        }
    }
}

/// A single rule with its compiled regex.
#[derive(Debug, Clone)]
pub struct PatternRule {
    /// Full tag reported on a match.
    pub tag: String,
    pub group: RuleGroup,
    pub category: String,
    /// Compiled regex for matching.
    pub regex: Regex,
}

/// (group, category, rule name, pattern)
type RuleSpec = (RuleGroup, &'static str, &'static str, &'static str);

const BUILTIN_RULES: &[RuleSpec] = &[
    // ── escalate: choice ──
    (RuleGroup::Escalate, "choice", "option_or_option", r"option\s+[a-z]\s+(or|vs\.?|versus)\s+(option\s+)?[a-z]\b"),
    (RuleGroup::Escalate, "choice", "which_option", r"which\s+(one|option|choice|approach|solution)"),
    (RuleGroup::Escalate, "choice", "do_you_prefer", r"do\s+you\s+prefer"),
    (RuleGroup::Escalate, "choice", "would_you_prefer", r"would\s+you\s+(prefer|like|rather|choose)"),
    (RuleGroup::Escalate, "choice", "should_we_pick", r"should\s+(we|i)\s+(go\s+with|choose|pick|select)"),
    (RuleGroup::Escalate, "choice", "please_choose", r"please\s+(choose|select|pick)"),
    (RuleGroup::Escalate, "choice", "opinion_request", r"what\s+do\s+you\s+think\s+(about|of)"),
    (RuleGroup::Escalate, "choice", "enumerated_options", r"(option|choice)\s*[1-9a-z][\s:]+.*?(option|choice)\s*[1-9a-z]\b"),
    // ── escalate: money ──
    (RuleGroup::Escalate, "money", "usd_amount", r"\$\s*[\d,]+(?:\.\d{2})?"),
    (RuleGroup::Escalate, "money", "eur_amount", r"€\s*[\d,]+(?:\.\d{2})?"),
    (RuleGroup::Escalate, "money", "gbp_amount", r"£\s*[\d,]+(?:\.\d{2})?"),
    (RuleGroup::Escalate, "money", "budget_terms", r"\b(budget|cost|price|expense|payment|invoice)\b"),
    (RuleGroup::Escalate, "money", "approval_verbs", r"\b(approve|approval|authorize|authorization)\b"),
    (RuleGroup::Escalate, "money", "quote_terms", r"\b(quote|quotation|estimate|pricing)\b"),
    // ── escalate: commitment ──
    (RuleGroup::Escalate, "commitment", "commit_verbs", r"\b(can\s+you\s+)?(commit|promise|guarantee)\b"),
    (RuleGroup::Escalate, "commitment", "deadline_terms", r"\b(deadline|due\s+date|deliver\s+by|complete\s+by)\b"),
    (RuleGroup::Escalate, "commitment", "end_of_period", r"\b(by\s+)?(end\s+of|before)\s+(the\s+)?(day|week|month|quarter)"),
    (RuleGroup::Escalate, "commitment", "delivery_date", r"when\s+can\s+you\s+(deliver|complete|finish)"),
    (RuleGroup::Escalate, "commitment", "delivery_feasibility", r"is\s+it\s+possible\s+to\s+(deliver|complete|finish)"),
    // ── escalate: sensitive ──
    (RuleGroup::Escalate, "sensitive", "confidential", r"\b(confidential|sensitive|private)\b"),
    (RuleGroup::Escalate, "sensitive", "urgent", r"\b(urgent|asap|immediately|critical)\b"),
    (RuleGroup::Escalate, "sensitive", "legal", r"\b(legal|lawyer|attorney|lawsuit)\b"),
    (RuleGroup::Escalate, "sensitive", "contract_terms", r"\b(contract|agreement|terms|nda|mou)\b"),
    (RuleGroup::Escalate, "sensitive", "signature_request", r"\b(sign|signature|execute)\s+(this|the)\s+(document|agreement|contract)"),
    (RuleGroup::Escalate, "sensitive", "compliance", r"\b(compliance|regulatory|audit)\b"),
    // ── auto_safe: meeting ──
    (RuleGroup::AutoSafe, "meeting", "meet_request", r"(can|could)\s+(we|you)\s+(meet|sync|chat|talk|call)"),
    (RuleGroup::AutoSafe, "meeting", "free_query", r"(are|is)\s+(you|your\s+team)\s+(free|available)"),
    (RuleGroup::AutoSafe, "meeting", "schedule_meeting", r"(schedule|set\s+up|arrange)\s+(a\s+)?(meeting|call|sync)"),
    (RuleGroup::AutoSafe, "meeting", "lets_meet", r"(let'?s|shall\s+we)\s+(meet|sync|chat|talk|call)"),
    (RuleGroup::AutoSafe, "meeting", "how_about_day", r"(how\s+about|what\s+about)\s+\w+day"),
    // ── auto_safe: acknowledgment ──
    (RuleGroup::AutoSafe, "acknowledgment", "thanks", r"\b(thanks|thank\s+you|thx|ty)\s*[!.]*\s*$"),
    (RuleGroup::AutoSafe, "acknowledgment", "received", r"(got\s+it|received|noted|understood)"),
    (RuleGroup::AutoSafe, "acknowledgment", "sounds_good", r"(sounds\s+good|looks\s+good|perfect|great)"),
    (RuleGroup::AutoSafe, "acknowledgment", "will_do", r"(will\s+do|on\s+it)"),
    // ── auto_safe: scheduling ──
    (RuleGroup::AutoSafe, "scheduling", "when_free", r"when\s+(are|is)\s+(you|your\s+team)\s+(free|available)"),
    (RuleGroup::AutoSafe, "scheduling", "availability", r"(your|what'?s\s+your)\s+availability"),
    (RuleGroup::AutoSafe, "scheduling", "let_me_know", r"(let\s+me\s+know|lmk)\s+(when|your\s+availability)"),
    (RuleGroup::AutoSafe, "scheduling", "share_calendar", r"(can\s+you\s+share|share)\s+your\s+(calendar|availability)"),
    // ── auto_safe: follow_up ──
    (RuleGroup::AutoSafe, "follow_up", "checking_in", r"(just\s+)?(checking\s+in|following\s+up)"),
    (RuleGroup::AutoSafe, "follow_up", "did_you_see", r"did\s+you\s+(get|receive|see)"),
    (RuleGroup::AutoSafe, "follow_up", "any_update", r"(any\s+update|updates?)\s+(on|about|regarding)"),
    (RuleGroup::AutoSafe, "follow_up", "touch_base", r"(wanted\s+to\s+)?(touch\s+base|check\s+in)"),
    // ── auto_safe: status_update ──
    (RuleGroup::AutoSafe, "status_update", "regret", r"(unfortunately|regret\s+to\s+inform)"),
    (RuleGroup::AutoSafe, "status_update", "not_selected", r"(not\s+(been\s+)?selected|not\s+moving\s+forward)"),
    (RuleGroup::AutoSafe, "status_update", "pursue_other", r"(decided\s+to\s+pursue|chosen\s+to\s+proceed\s+with)\s+other"),
    (RuleGroup::AutoSafe, "status_update", "position_filled", r"(position|role)\s+has\s+been\s+filled"),
    (RuleGroup::AutoSafe, "status_update", "not_proceeding", r"will\s+not\s+be\s+(proceeding|moving\s+forward)"),
    (RuleGroup::AutoSafe, "status_update", "careful_consideration", r"after\s+careful\s+consideration"),
    (RuleGroup::AutoSafe, "status_update", "notify_you", r"this\s+is\s+(a\s+)?(to\s+)?(notify|inform|update)\s+you"),
    (RuleGroup::AutoSafe, "status_update", "let_you_know", r"wanted\s+to\s+let\s+you\s+know"),
    (RuleGroup::AutoSafe, "status_update", "for_your_records", r"for\s+your\s+(information|records|reference)"),
    (RuleGroup::AutoSafe, "status_update", "be_advised", r"please\s+be\s+(advised|informed)"),
    (RuleGroup::AutoSafe, "status_update", "status_update", r"(status\s+update|update\s+on\s+your)"),
];

/// Compiled rule table, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<PatternRule>,
}

impl RuleTable {
    /// Table with every built-in rule.
    pub fn default_rules() -> Result<Self, ConfigError> {
        let mut table = Self::empty();
        for (group, category, name, pattern) in BUILTIN_RULES {
            table.add_rule(*group, category, name, pattern)?;
        }
        Ok(table)
    }

    /// Table with no rules (for testing).
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule. The pattern is compiled case-insensitively.
    pub fn add_rule(
        &mut self,
        group: RuleGroup,
        category: &str,
        name: &str,
        pattern: &str,
    ) -> Result<(), ConfigError> {
        let regex =
            Regex::new(&format!("(?i){pattern}")).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        self.rules.push(PatternRule {
            tag: format!("{}.{category}.{name}", group.as_str()),
            group,
            category: category.to_string(),
            regex,
        });
        Ok(())
    }

    /// Append configured escalate patterns under the `custom` category.
    pub fn with_custom_escalations(mut self, patterns: &[String]) -> Result<Self, ConfigError> {
        for (i, pattern) in patterns.iter().enumerate() {
            self.add_rule(RuleGroup::Escalate, CUSTOM_CATEGORY, &format!("pattern_{i}"), pattern)?;
        }
        Ok(self)
    }

    /// Tags of every rule that matches `text`.
    pub fn matches(&self, text: &str) -> BTreeSet<String> {
        self.collect(text, |_| true)
    }

    /// Tags of every rule in `group` that matches `text`.
    pub fn matches_group(&self, group: RuleGroup, text: &str) -> BTreeSet<String> {
        self.collect(text, |rule| rule.group == group)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn collect(&self, text: &str, keep: impl Fn(&PatternRule) -> bool) -> BTreeSet<String> {
        if text.is_empty() {
            return BTreeSet::new();
        }
        let matched: BTreeSet<String> = self
            .rules
            .iter()
            .filter(|rule| keep(rule) && rule.regex.is_match(text))
            .map(|rule| rule.tag.clone())
            .collect();
        if !matched.is_empty() {
            debug!(count = matched.len(), tags = ?matched, "Pattern rules matched");
        }
        matched
    }
}

/// Category segment of a tag (`escalate.money.usd_amount` → `money`).
pub fn tag_category(tag: &str) -> Option<&str> {
    tag.split('.').nth(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RuleTable {
        RuleTable::default_rules().unwrap()
    }

    fn categories(tags: &BTreeSet<String>) -> BTreeSet<&str> {
        tags.iter().filter_map(|t| tag_category(t)).collect()
    }

    #[test]
    fn builtin_rules_compile() {
        assert_eq!(table().len(), BUILTIN_RULES.len());
    }

    #[test]
    fn empty_text_matches_nothing() {
        assert!(table().matches("").is_empty());
    }

    #[test]
    fn currency_amounts_escalate() {
        let t = table();
        for text in ["It costs $1,200.00", "€ 500 total", "£75 please"] {
            let tags = t.matches_group(RuleGroup::Escalate, text);
            assert!(categories(&tags).contains("money"), "{text}");
        }
    }

    #[test]
    fn binary_choice_escalates() {
        let tags = table().matches_group(RuleGroup::Escalate, "Should we do option a or option b?");
        assert!(tags.contains("escalate.choice.option_or_option"));
    }

    #[test]
    fn returns_every_match_not_just_first() {
        let tags = table().matches(
            "Option A: $10,000 ... Option B: $15,000 ... Which would you prefer?",
        );
        assert!(tags.contains("escalate.money.usd_amount"));
        assert!(tags.contains("escalate.choice.enumerated_options"));
        assert!(tags.contains("escalate.choice.would_you_prefer"));
    }

    #[test]
    fn case_insensitive() {
        let tags = table().matches("CAN WE MEET THURSDAY?");
        assert!(tags.contains("auto_safe.meeting.meet_request"));
    }

    #[test]
    fn meeting_request_is_auto_safe_only() {
        let t = table();
        let text = "Hello\nCan we meet Thursday afternoon?";
        assert!(t.matches_group(RuleGroup::Escalate, text).is_empty());
        assert!(!t.matches_group(RuleGroup::AutoSafe, text).is_empty());
    }

    #[test]
    fn deterministic_across_calls() {
        let t = table();
        let text = "Thanks! Got it, any update on the contract by end of week?";
        let first = t.matches(text);
        for _ in 0..10 {
            assert_eq!(t.matches(text), first);
        }
    }

    #[test]
    fn malformed_custom_pattern_is_config_error() {
        let err = RuleTable::empty().with_custom_escalations(&["(unclosed".to_string()]);
        assert!(matches!(err, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn custom_escalation_tagged() {
        let t = RuleTable::empty()
            .with_custom_escalations(&[r"\bmerger\b".to_string()])
            .unwrap();
        let tags = t.matches("About the merger");
        assert!(tags.contains("escalate.custom.pattern_0"));
    }
}
