//! Shared types for the triage pipeline.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Change cursor ───────────────────────────────────────────────────

/// Mailbox change position. Everything up to and including this point has
/// been considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeCursor(pub u64);

impl ChangeCursor {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChangeCursor {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

// ── Item ────────────────────────────────────────────────────────────

/// A message in the item's thread, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    /// Sender address.
    pub sender: String,
    /// Message body (plain text, quotes stripped).
    pub body: String,
    /// When it was sent, if the mailbox reported it.
    pub timestamp: Option<DateTime<Utc>>,
}

/// One unit of work: the flagged message plus its thread.
///
/// The label set is the only processing state. There is no side table
/// tracking which items were handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Mailbox message id.
    pub id: String,
    pub thread_id: String,
    /// Label names currently on the message.
    pub labels: BTreeSet<String>,
    /// Bare sender address of the flagged message.
    pub sender: String,
    /// Display name of the sender, when the From header had one.
    pub sender_name: Option<String>,
    pub subject: String,
    /// Thread messages, oldest first. The flagged message is last.
    pub messages: Vec<ThreadMessage>,
    /// Declared language, if the mailbox knows it. Detected otherwise.
    pub language: Option<String>,
    /// RFC 822 Message-ID of the flagged message, for reply threading.
    pub message_id_header: Option<String>,
    /// References header of the flagged message.
    pub references: Option<String>,
}

impl Item {
    /// Body of the newest message, or an empty string for an empty thread.
    pub fn latest_body(&self) -> &str {
        self.messages.last().map(|m| m.body.as_str()).unwrap_or("")
    }

    /// Subject and newest body joined for matching.
    pub fn latest_text(&self) -> String {
        format!("{}\n{}", self.subject, self.latest_body())
    }

    /// Subject and every body in the thread joined for matching.
    pub fn thread_text(&self) -> String {
        let mut text = self.subject.clone();
        for m in &self.messages {
            text.push('\n');
            text.push_str(&m.body);
        }
        text
    }
}

// ── Verdict ─────────────────────────────────────────────────────────

/// Why a human is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationKind {
    /// The sender asks us to pick between options.
    Choice,
    /// Money, commitments or sensitive matters need sign-off.
    Approval,
    /// Nothing specific matched; a human should look.
    Input,
}

/// Classification result for one item.
///
/// Tags record which rules produced the verdict, for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Safe to reply without a human.
    AutoRespond { tags: BTreeSet<String> },
    /// Escalate to the mailbox owner.
    NeedsInput {
        tags: BTreeSet<String>,
        kind: EscalationKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    /// Automated or auto-reply mail. Ignore completely.
    Skip { tags: BTreeSet<String>, reason: String },
}

impl Verdict {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoRespond { .. } => "auto_respond",
            Self::NeedsInput { .. } => "needs_input",
            Self::Skip { .. } => "skip",
        }
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        match self {
            Self::AutoRespond { tags } | Self::NeedsInput { tags, .. } | Self::Skip { tags, .. } => {
                tags
            }
        }
    }

    pub fn is_auto_respond(&self) -> bool {
        matches!(self, Self::AutoRespond { .. })
    }
}

// ── Tools ───────────────────────────────────────────────────────────

/// One planned tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: serde_json::Value,
}

/// Ordered tool invocations for one item. May be empty.
pub type ToolPlan = Vec<ToolCall>;

/// Result of one planned tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    /// Structured payload on success, `null` on failure.
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            payload: serde_json::Value::Null,
            error: Some(reason.into()),
        }
    }

    /// Human-readable summary if the tool provided one.
    pub fn summary(&self) -> Option<&str> {
        self.payload.get("summary").and_then(|v| v.as_str())
    }
}

// ── Draft ───────────────────────────────────────────────────────────

/// Composed reply for exactly one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub item_id: String,
    /// Reply body as plain text, without signature.
    pub body: String,
    /// HTML signature block, if configured.
    pub signature_html: Option<String>,
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Label mutation applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelTransition {
    EligibleToDone,
    EligibleToPending,
}

/// How an item's pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Sent,
    Pending,
    Skip,
    Error,
}

/// Terminal record of one item's pass. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub item_id: String,
    /// `None` when the item never reached classification (gate closed or fetch failed).
    pub verdict: Option<Verdict>,
    pub terminal: Terminal,
    pub sent: bool,
    pub transition: Option<LabelTransition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl PipelineOutcome {
    pub(crate) fn new(item_id: impl Into<String>, verdict: Option<Verdict>, terminal: Terminal) -> Self {
        Self {
            item_id: item_id.into(),
            verdict,
            terminal,
            sent: false,
            transition: None,
            tool_results: Vec::new(),
            error: None,
            finished_at: Utc::now(),
        }
    }

    pub(crate) fn with_sent(mut self, sent: bool) -> Self {
        self.sent = sent;
        self
    }

    pub(crate) fn with_transition(mut self, transition: LabelTransition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub(crate) fn with_tool_results(mut self, results: Vec<ToolResult>) -> Self {
        self.tool_results = results;
        self
    }

    pub(crate) fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(bodies: &[&str]) -> Item {
        Item {
            id: "m1".into(),
            thread_id: "t1".into(),
            labels: BTreeSet::new(),
            sender: "a@b.com".into(),
            sender_name: None,
            subject: "Hello".into(),
            messages: bodies
                .iter()
                .map(|b| ThreadMessage {
                    sender: "a@b.com".into(),
                    body: b.to_string(),
                    timestamp: None,
                })
                .collect(),
            language: None,
            message_id_header: None,
            references: None,
        }
    }

    #[test]
    fn text_windows() {
        let it = item(&["first", "second"]);
        assert_eq!(it.latest_body(), "second");
        assert_eq!(it.latest_text(), "Hello\nsecond");
        assert_eq!(it.thread_text(), "Hello\nfirst\nsecond");
        assert_eq!(item(&[]).latest_body(), "");
    }

    #[test]
    fn verdict_serializes_tagged() {
        let v = Verdict::NeedsInput {
            tags: ["escalate.money.currency".to_string()].into(),
            kind: EscalationKind::Approval,
            summary: None,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["verdict"], "needs_input");
        assert_eq!(json["kind"], "approval");
        assert!(json.get("summary").is_none());
        assert_eq!(v.label(), "needs_input");
    }

    #[test]
    fn cursor_orders_numerically() {
        assert!(ChangeCursor(9) < ChangeCursor(10));
        assert_eq!(ChangeCursor(42).to_string(), "42");
    }
}
