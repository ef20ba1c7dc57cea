//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use mail_triage::config::TriageConfig;
use mail_triage::draft::{DraftRequest, Drafter};
use mail_triage::error::{DraftError, MailboxError};
use mail_triage::mailbox::{HistoryChange, HistoryDelta, Mailbox, SearchHit};
use mail_triage::pipeline::{
    ChangeCursor, Classifier, CursorTracker, Draft, Item, ItemProcessor, LabelGate, LabelNames,
    NotificationHandler, ThreadMessage, ToolResult,
};
use mail_triage::retry::RetryPolicy;
use mail_triage::store::{ContactMemory, InMemoryContactMemory, InMemoryCursorStore};
use mail_triage::tools::ToolRegistry;

pub const RESPOND: &str = "Agent Respond";
pub const PENDING: &str = "Agent Pending";
pub const DONE: &str = "Agent Done";

pub fn email(id: &str, sender: &str, subject: &str, body: &str) -> Item {
    Item {
        id: id.into(),
        thread_id: format!("thread-{id}"),
        labels: BTreeSet::from([RESPOND.to_string(), "INBOX".to_string()]),
        sender: sender.into(),
        sender_name: None,
        subject: subject.into(),
        messages: vec![ThreadMessage {
            sender: sender.into(),
            body: body.into(),
            timestamp: None,
        }],
        language: None,
        message_id_header: Some(format!("<{id}@example.net>")),
        references: None,
    }
}

pub fn flagged(id: &str) -> HistoryChange {
    HistoryChange {
        item_id: id.into(),
        thread_id: format!("thread-{id}"),
        labels_added: BTreeSet::from([RESPOND.to_string()]),
    }
}

pub fn labels(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[derive(Default)]
struct Inbox {
    items: HashMap<String, Item>,
    history: HistoryDelta,
    sent: Vec<Draft>,
    label_writes: usize,
    search_hits: Vec<SearchHit>,
    human_relabel: Option<(String, BTreeSet<String>)>,
}

/// Mailbox held in memory. Counts every mutating call.
#[derive(Default)]
pub struct MemoryMailbox {
    inbox: Mutex<Inbox>,
}

impl MemoryMailbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inbox) -> T) -> T {
        let mut inbox = self.inbox.lock().unwrap();
        f(&mut inbox)
    }

    pub fn deliver(&self, item: Item) {
        self.with(|s| {
            s.history.changes.push(flagged(&item.id));
            s.items.insert(item.id.clone(), item);
        });
    }

    pub fn set_latest(&self, cursor: u64) {
        self.with(|s| s.history.latest = Some(ChangeCursor(cursor)));
    }

    pub fn set_search_hits(&self, hits: Vec<SearchHit>) {
        self.with(|s| s.search_hits = hits);
    }

    /// Simulates a person moving the item right before the next label read.
    pub fn human_relabels_before_next_read(&self, id: &str, to: &[&str]) {
        self.with(|s| s.human_relabel = Some((id.into(), labels(to))));
    }

    pub fn labels_of(&self, id: &str) -> BTreeSet<String> {
        self.with(|s| s.items.get(id).map(|i| i.labels.clone()).unwrap_or_default())
    }

    pub fn sent(&self) -> Vec<Draft> {
        self.with(|s| s.sent.clone())
    }

    /// Sends plus label writes.
    pub fn mutations(&self) -> usize {
        self.with(|s| s.sent.len() + s.label_writes)
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn fetch_item(&self, item_id: &str) -> Result<Item, MailboxError> {
        self.with(|s| s.items.get(item_id).cloned())
            .ok_or_else(|| MailboxError::NotFound {
                what: item_id.into(),
            })
    }

    async fn fetch_history_since(&self, _cursor: ChangeCursor) -> Result<HistoryDelta, MailboxError> {
        Ok(self.with(|s| s.history.clone()))
    }

    async fn send(&self, _item: &Item, draft: &Draft) -> Result<String, MailboxError> {
        Ok(self.with(|s| {
            s.sent.push(draft.clone());
            format!("sent-{}", s.sent.len())
        }))
    }

    async fn set_labels(
        &self,
        item_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), MailboxError> {
        self.with(|s| {
            s.label_writes += 1;
            if let Some(item) = s.items.get_mut(item_id) {
                item.labels.retain(|l| !remove.contains(l));
                item.labels.extend(add.iter().cloned());
            }
        });
        Ok(())
    }

    async fn get_labels(&self, item_id: &str) -> Result<BTreeSet<String>, MailboxError> {
        Ok(self.with(|s| {
            if let Some((id, labels)) = s.human_relabel.take()
                && let Some(item) = s.items.get_mut(&id)
            {
                item.labels = labels;
            }
            s.items
                .get(item_id)
                .map(|i| i.labels.clone())
                .unwrap_or_default()
        }))
    }

    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>, MailboxError> {
        Ok(self.with(|s| s.search_hits.iter().take(max_results).cloned().collect()))
    }
}

/// Drafter that echoes a canned reply and keeps what it was given.
#[derive(Default)]
pub struct RecordingDrafter {
    seen: Mutex<Vec<Vec<ToolResult>>>,
}

impl RecordingDrafter {
    pub fn tool_results_seen(&self) -> Vec<Vec<ToolResult>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Drafter for RecordingDrafter {
    async fn compose(&self, request: DraftRequest<'_>) -> Result<String, DraftError> {
        self.seen.lock().unwrap().push(request.tool_results.to_vec());
        Ok(format!("Hi, thanks for reaching out about \"{}\".", request.item.subject))
    }
}

pub struct World {
    pub mailbox: Arc<MemoryMailbox>,
    pub cursors: Arc<InMemoryCursorStore>,
    pub contacts: Arc<InMemoryContactMemory>,
    pub drafter: Arc<RecordingDrafter>,
    pub handler: NotificationHandler,
}

pub fn world(stored_cursor: Option<u64>, tools: ToolRegistry) -> World {
    let mailbox = MemoryMailbox::new();
    let cursors = Arc::new(InMemoryCursorStore::new(stored_cursor.map(ChangeCursor)));
    let contacts = Arc::new(InMemoryContactMemory::new());
    let drafter = Arc::new(RecordingDrafter::default());
    let policy = retry();
    let names = LabelNames::default();
    let contact_memory: Arc<dyn ContactMemory> = contacts.clone();

    let processor = ItemProcessor::new(
        mailbox.clone(),
        Arc::new(Classifier::from_config(&TriageConfig::default()).unwrap()),
        Arc::new(tools),
        drafter.clone(),
        Some(contact_memory),
        LabelGate::new(mailbox.clone(), names.clone(), policy),
        Some("<p>Sam</p>".into()),
        policy,
    );
    let tracker = CursorTracker::new(cursors.clone(), mailbox.clone(), names.respond, policy);

    World {
        mailbox,
        cursors,
        contacts,
        drafter,
        handler: NotificationHandler::new(tracker, Arc::new(processor)),
    }
}

pub fn retry() -> RetryPolicy {
    RetryPolicy::new(Duration::ZERO)
}
