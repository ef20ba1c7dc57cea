//! Sender policy: who is ignored outright and who always reaches a human.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Automated-system tokens in the local part, delimited by `.`, `_`, `+`, `-`
/// or the ends, so `billing-noreply`, `noreply+42` and `no.reply` all match.
static AUTOMATED_LOCAL_PART: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^|[._+-])(no[-_.]?reply|do[-_.]?not[-_.]?reply|mailer[-_.]?daemon|postmaster|notifications?|alerts?|bounces?|automated|auto[-_.]?reply)([._+-]|$)",
    )
    .ok()
});

const AUTO_REPLY_MARKERS: &[&str] = &[
    r"out\s+of\s+(the\s+)?office",
    r"out-of-office",
    r"automatic\s+reply",
    r"auto-?reply",
    r"away\s+from\s+.*office",
    r"on\s+vacation",
    r"on\s+leave",
    r"currently\s+unavailable",
];

static AUTO_REPLY_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    AUTO_REPLY_MARKERS
        .iter()
        .filter_map(|p| Regex::new(&format!("(?i){p}")).ok())
        .collect()
});

/// Policy verdict for a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderVerdict {
    /// Automated mail or an auto-reply. Never answered, never escalated.
    SkipSilent(SkipReason),
    /// Configured always-notify sender.
    AlwaysEscalate,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AutomatedSender,
    AutoReplyMarker,
}

impl SkipReason {
    pub fn tag(self) -> &'static str {
        match self {
            Self::AutomatedSender => "sender.automated",
            Self::AutoReplyMarker => "sender.auto_reply_marker",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::AutomatedSender => "automated sender address",
            Self::AutoReplyMarker => "out-of-office or automatic reply",
        }
    }
}

/// Always-notify list plus the built-in automated-sender signatures.
#[derive(Debug, Clone, Default)]
pub struct SenderPolicy {
    /// Lowercased entries. `@domain` or a bare domain matches by domain.
    always_notify: Vec<String>,
}

impl SenderPolicy {
    pub fn new(always_notify: &[String]) -> Self {
        Self {
            always_notify: always_notify
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// Address-only verdict.
    pub fn classify_sender(&self, address: &str) -> SenderVerdict {
        let address = normalize_address(address);
        if is_automated_address(&address) {
            return SenderVerdict::SkipSilent(SkipReason::AutomatedSender);
        }
        if self.is_always_notify(&address) {
            return SenderVerdict::AlwaysEscalate;
        }
        SenderVerdict::Normal
    }

    /// Address verdict, also checking subject and body for auto-reply markers.
    pub fn evaluate(&self, address: &str, subject: &str, body: &str) -> SenderVerdict {
        match self.classify_sender(address) {
            SenderVerdict::SkipSilent(reason) => SenderVerdict::SkipSilent(reason),
            verdict => {
                if is_auto_reply(subject, body) {
                    debug!("Auto-reply marker found in message");
                    SenderVerdict::SkipSilent(SkipReason::AutoReplyMarker)
                } else {
                    verdict
                }
            }
        }
    }

    fn is_always_notify(&self, address: &str) -> bool {
        let domain = address.rsplit_once('@').map(|(_, d)| d).unwrap_or("");
        self.always_notify.iter().any(|entry| {
            if let Some(d) = entry.strip_prefix('@') {
                domain == d
            } else if entry.contains('@') {
                address == entry
            } else {
                domain == entry
            }
        })
    }
}

/// Reduce `"Jane" <Jane@X.com>` to `jane@x.com`.
pub fn normalize_address(raw: &str) -> String {
    let raw = raw.trim();
    let inner = match (raw.rfind('<'), raw.rfind('>')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => raw,
    };
    inner.trim().to_lowercase()
}

/// Display-name part of a From header, if any.
pub fn display_name(raw: &str) -> Option<String> {
    let start = raw.rfind('<')?;
    let name = raw[..start].trim().trim_matches('"').trim();
    (!name.is_empty()).then(|| name.to_string())
}

fn is_automated_address(address: &str) -> bool {
    let local = address.split('@').next().unwrap_or("");
    !local.is_empty()
        && AUTOMATED_LOCAL_PART
            .as_ref()
            .is_some_and(|re| re.is_match(local))
}

fn is_auto_reply(subject: &str, body: &str) -> bool {
    AUTO_REPLY_REGEXES
        .iter()
        .any(|re| re.is_match(subject) || re.is_match(body))
}
