//! Mailbox collaborator: the only way the engine reads or mutates mail.

pub mod gmail;
pub mod labels;
pub mod message;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MailboxError;
use crate::pipeline::types::{ChangeCursor, Draft, Item};

pub use gmail::GmailMailbox;

/// One history record relevant to triage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryChange {
    pub item_id: String,
    pub thread_id: String,
    /// Label names this change put on the message.
    pub labels_added: BTreeSet<String>,
}

/// Changes after a cursor, in mailbox order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryDelta {
    pub changes: Vec<HistoryChange>,
    /// Newest position the mailbox reported while listing, if any.
    pub latest: Option<ChangeCursor>,
}

/// Search result used by the thread-search tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub thread_id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Full item: flagged message, its thread, current labels.
    async fn fetch_item(&self, item_id: &str) -> Result<Item, MailboxError>;

    async fn fetch_history_since(&self, cursor: ChangeCursor) -> Result<HistoryDelta, MailboxError>;

    /// Send `draft` as a threaded reply to `item`. Returns the sent message id.
    async fn send(&self, item: &Item, draft: &Draft) -> Result<String, MailboxError>;

    /// Add and remove label names in one mutation.
    async fn set_labels(
        &self,
        item_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), MailboxError>;

    /// Current label names, read fresh from the mailbox.
    async fn get_labels(&self, item_id: &str) -> Result<BTreeSet<String>, MailboxError>;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, MailboxError>;
}

/// Push-notification subscription, renewed periodically.
#[async_trait]
pub trait WatchRenewal: Send + Sync {
    /// (Re)register the push subscription. Returns the mailbox's current cursor.
    async fn renew_watch(&self) -> Result<WatchStatus, MailboxError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    pub cursor: ChangeCursor,
    /// Subscription expiry, epoch milliseconds.
    pub expiration_ms: Option<u64>,
}
