//! Error types for mail-triage.

use std::time::Duration;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
///
/// These are never retried. An item that hits one ends in an error outcome
/// with its labels untouched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid rule pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Unknown tool requested by plan: {name}")]
    UnknownTool { name: String },

    #[error("Label {name:?} does not exist in the mailbox")]
    MissingLabel { name: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox collaborator errors (Gmail API or a test double).
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("{op} returned HTTP {status}: {body}")]
    Http { op: String, status: u16, body: String },

    #[error("{op} failed: {reason}")]
    Network { op: String, reason: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Mailbox authentication failed: {0}")]
    Auth(String),

    #[error("Invalid response from {op}: {reason}")]
    InvalidResponse { op: String, reason: String },

    #[error("Failed to build outgoing message: {0}")]
    Build(String),

    #[error("Label {name:?} is not known to the mailbox")]
    UnknownLabel { name: String },

    #[error("Mailbox feature not configured: {0}")]
    NotConfigured(String),
}

impl MailboxError {
    /// Rate limiting, server-side failures and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network { .. } => true,
            _ => false,
        }
    }
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::RateLimited { .. })
    }
}

/// Drafting collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Drafting service failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Drafting service returned an empty reply")]
    Empty,

    #[error("Drafting service unavailable: {0}")]
    Unavailable(String),
}

impl DraftError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Llm(e) => e.is_transient(),
            Self::Unavailable(_) => true,
            Self::Empty => false,
        }
    }
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<MailboxError> for ToolError {
    fn from(e: MailboxError) -> Self {
        if e.is_transient() {
            Self::Unavailable(e.to_string())
        } else {
            Self::ExecutionFailed(e.to_string())
        }
    }
}

/// Malformed Pub/Sub push payloads.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("message data is not base64: {0}")]
    Base64(String),

    #[error("message data is not a Gmail notification: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a whole notification rather than a single item.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Cursor store failed: {0}")]
    Cursor(#[from] DatabaseError),

    #[error("History query failed: {0}")]
    History(#[from] MailboxError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
