//! Configuration types.
//!
//! Everything is read from environment variables. Each struct exposes
//! `from_env()` plus `from_lookup()`, which takes any key → value function so
//! tests can feed a map instead of mutating the process environment.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::pipeline::labels::LabelNames;
use crate::pipeline::rules::DEFAULT_AUTO_SAFE_CATEGORIES;
use crate::retry::DEFAULT_RETRY_BACKOFF;

/// Which part of a thread the pattern matcher looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextWindow {
    /// Subject plus the newest message body.
    #[default]
    LatestMessage,
    /// Subject plus every message body in the thread.
    FullThread,
}

impl FromStr for TextWindow {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" | "latest_message" => Ok(Self::LatestMessage),
            "thread" | "full_thread" => Ok(Self::FullThread),
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_TEXT_WINDOW".into(),
                message: format!("expected 'latest' or 'thread', got {other:?}"),
            }),
        }
    }
}

// ── Triage ──────────────────────────────────────────────────────────

/// Classification and pipeline behaviour.
#[derive(Debug, Clone)]
pub struct TriageConfig {
    /// Names of the three workflow labels.
    pub labels: LabelNames,
    /// Addresses (or `@domain` entries) that are always escalated.
    pub always_notify: Vec<String>,
    /// Auto-safe rule categories allowed to produce an automatic reply.
    pub auto_safe_categories: BTreeSet<String>,
    /// Text fed to the pattern matcher for escalation checks.
    pub text_window: TextWindow,
    /// Extra escalate patterns appended to the built-in table.
    pub extra_escalate_patterns: Vec<String>,
    /// HTML signature appended to every outgoing reply.
    pub signature_html: Option<String>,
    /// The mailbox owner's address, used to drop our own messages from style learning.
    pub user_email: Option<String>,
    /// Wait before the single retry of a transient collaborator failure.
    pub retry_backoff: Duration,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            labels: LabelNames::default(),
            always_notify: Vec::new(),
            auto_safe_categories: DEFAULT_AUTO_SAFE_CATEGORIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            text_window: TextWindow::default(),
            extra_escalate_patterns: Vec::new(),
            signature_html: None,
            user_email: None,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl TriageConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let labels = LabelNames {
            respond: get("TRIAGE_LABEL_RESPOND").unwrap_or(defaults.labels.respond),
            pending: get("TRIAGE_LABEL_PENDING").unwrap_or(defaults.labels.pending),
            done: get("TRIAGE_LABEL_DONE").unwrap_or(defaults.labels.done),
        };

        let always_notify = split_list(get("TRIAGE_ALWAYS_NOTIFY").unwrap_or_default());

        let auto_safe_categories = match get("TRIAGE_AUTO_SAFE_CATEGORIES") {
            Some(raw) => split_list(raw).into_iter().collect(),
            None => defaults.auto_safe_categories,
        };

        let text_window = match get("TRIAGE_TEXT_WINDOW") {
            Some(raw) => raw.parse()?,
            None => defaults.text_window,
        };

        let extra_escalate_patterns = get("TRIAGE_EXTRA_ESCALATE_PATTERNS")
            .map(|raw| {
                raw.split(";;")
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let retry_backoff = match get("TRIAGE_RETRY_BACKOFF_MS") {
            Some(raw) => Duration::from_millis(parse_number("TRIAGE_RETRY_BACKOFF_MS", &raw)?),
            None => defaults.retry_backoff,
        };

        Ok(Self {
            labels,
            always_notify,
            auto_safe_categories,
            text_window,
            extra_escalate_patterns,
            signature_html: get("TRIAGE_SIGNATURE_HTML").filter(|s| !s.trim().is_empty()),
            user_email: get("TRIAGE_USER_EMAIL").filter(|s| !s.trim().is_empty()),
            retry_backoff,
        })
    }
}

// ── Google ──────────────────────────────────────────────────────────

/// OAuth credentials and API endpoints for Gmail, Calendar and People.
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
    pub token_url: String,
    pub gmail_base_url: String,
    pub calendar_base_url: String,
    pub people_base_url: String,
    pub calendar_id: String,
    /// Full Pub/Sub topic name for `users.watch`, e.g. `projects/p/topics/t`.
    pub pubsub_topic: Option<String>,
    pub request_timeout: Duration,
}

impl GoogleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &str| {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let client_id = required("GOOGLE_CLIENT_ID")?;
        let client_secret = SecretString::from(required("GOOGLE_CLIENT_SECRET")?);
        let refresh_token = SecretString::from(required("GOOGLE_REFRESH_TOKEN")?);

        let pubsub_topic = match (get("GCP_PROJECT_ID"), get("GMAIL_PUBSUB_TOPIC")) {
            (_, Some(topic)) if topic.starts_with("projects/") => Some(topic),
            (Some(project), Some(topic)) => Some(format!("projects/{project}/topics/{topic}")),
            (Some(project), None) => Some(format!("projects/{project}/topics/gmail-notifications")),
            _ => None,
        };

        let request_timeout = match get("GOOGLE_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_number("GOOGLE_REQUEST_TIMEOUT_SECS", &raw)?),
            None => Duration::from_secs(30),
        };

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
            token_url: get("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|| "https://oauth2.googleapis.com/token".into()),
            gmail_base_url: get("GMAIL_API_BASE")
                .unwrap_or_else(|| "https://gmail.googleapis.com/gmail/v1/users/me".into()),
            calendar_base_url: get("CALENDAR_API_BASE")
                .unwrap_or_else(|| "https://www.googleapis.com/calendar/v3".into()),
            people_base_url: get("PEOPLE_API_BASE")
                .unwrap_or_else(|| "https://people.googleapis.com/v1".into()),
            calendar_id: get("GOOGLE_CALENDAR_ID").unwrap_or_else(|| "primary".into()),
            pubsub_topic,
            request_timeout,
        })
    }
}

// ── Server ──────────────────────────────────────────────────────────

/// Webhook listener and local storage.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    /// Shared secret expected as `?token=` on push and watch requests.
    pub webhook_token: Option<SecretString>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port: u16 = match get("PORT") {
            Some(raw) => parse_number("PORT", &raw)?,
            None => 8080,
        };
        let host = get("TRIAGE_BIND_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let bind: SocketAddr =
            format!("{host}:{port}")
                .parse()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TRIAGE_BIND_HOST".into(),
                    message: format!("{e}"),
                })?;

        let db_path = get("TRIAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/mail-triage.db"));

        let webhook_token = get("TRIAGE_WEBHOOK_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::from);

        Ok(Self {
            bind,
            db_path,
            webhook_token,
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn split_list(raw: String) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

pub(crate) fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{raw:?}: {e}"),
    })
}
