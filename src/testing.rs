//! In-memory collaborators for unit tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::draft::{DraftRequest, Drafter};
use crate::error::{DraftError, MailboxError};
use crate::mailbox::{HistoryDelta, Mailbox, SearchHit};
use crate::pipeline::types::{ChangeCursor, Draft, Item, ThreadMessage};

/// Eligible single-message item from `sender`.
pub(crate) fn item(id: &str, sender: &str, subject: &str, body: &str) -> Item {
    Item {
        id: id.to_string(),
        thread_id: format!("thread-{id}"),
        labels: BTreeSet::from(["Agent Respond".to_string(), "INBOX".to_string()]),
        sender: sender.to_string(),
        sender_name: None,
        subject: subject.to_string(),
        messages: vec![ThreadMessage {
            sender: sender.to_string(),
            body: body.to_string(),
            timestamp: None,
        }],
        language: None,
        message_id_header: Some(format!("<{id}@mail.example.com>")),
        references: None,
    }
}

fn unavailable(op: &str) -> MailboxError {
    MailboxError::Http {
        op: op.to_string(),
        status: 503,
        body: "backend unavailable".into(),
    }
}

#[derive(Default)]
struct MailboxState {
    items: HashMap<String, Item>,
    history: HistoryDelta,
    fail_history: bool,
    label_write_failures: usize,
    send_failures: usize,
    reject_sends: bool,
    relabel_on_read: Option<(String, BTreeSet<String>)>,
    sent: Vec<Draft>,
    search_hits: Vec<SearchHit>,
}

/// Scriptable mailbox. Labels live on the stored items.
#[derive(Default)]
pub(crate) struct FakeMailbox {
    state: Mutex<MailboxState>,
    history_calls: AtomicUsize,
    label_writes: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MailboxState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut state)
    }

    pub fn add_item(&self, item: Item) {
        self.with_state(|s| s.items.insert(item.id.clone(), item));
    }

    pub fn set_history(&self, delta: HistoryDelta) {
        self.with_state(|s| s.history = delta);
    }

    pub fn fail_history(&self, fail: bool) {
        self.with_state(|s| s.fail_history = fail);
    }

    /// The next `n` label writes fail with a 503.
    pub fn fail_label_writes(&self, n: usize) {
        self.with_state(|s| s.label_write_failures = n);
    }

    /// The next `n` sends fail with a 503.
    pub fn fail_sends(&self, n: usize) {
        self.with_state(|s| s.send_failures = n);
    }

    /// Every send fails with a non-transient error.
    pub fn reject_sends(&self) {
        self.with_state(|s| s.reject_sends = true);
    }

    /// Replace `item_id`'s labels just before the next label read, as if a
    /// human changed them mid-pass.
    pub fn relabel_on_next_read(&self, item_id: &str, labels: &[&str]) {
        let labels = labels.iter().map(|l| l.to_string()).collect();
        self.with_state(|s| s.relabel_on_read = Some((item_id.to_string(), labels)));
    }

    pub fn set_search_hits(&self, hits: Vec<SearchHit>) {
        self.with_state(|s| s.search_hits = hits);
    }

    pub fn labels_of(&self, item_id: &str) -> BTreeSet<String> {
        self.with_state(|s| s.items.get(item_id).map(|i| i.labels.clone()).unwrap_or_default())
    }

    pub fn sent(&self) -> Vec<Draft> {
        self.with_state(|s| s.sent.clone())
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn label_writes(&self) -> usize {
        self.label_writes.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_item(&self, item_id: &str) -> Result<Item, MailboxError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| s.items.get(item_id).cloned()).ok_or_else(|| MailboxError::NotFound {
            what: format!("message {item_id}"),
        })
    }

    async fn fetch_history_since(&self, _cursor: ChangeCursor) -> Result<HistoryDelta, MailboxError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.with_state(|s| {
            if s.fail_history {
                Err(MailboxError::Auth("history revoked".into()))
            } else {
                Ok(s.history.clone())
            }
        })
    }

    async fn send(&self, item: &Item, draft: &Draft) -> Result<String, MailboxError> {
        self.with_state(|s| {
            if s.reject_sends {
                return Err(MailboxError::Http {
                    op: "send".into(),
                    status: 400,
                    body: "invalid recipient".into(),
                });
            }
            if s.send_failures > 0 {
                s.send_failures -= 1;
                return Err(unavailable("send"));
            }
            s.sent.push(draft.clone());
            Ok(format!("sent-{}-{}", item.id, s.sent.len()))
        })
    }

    async fn set_labels(
        &self,
        item_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), MailboxError> {
        self.with_state(|s| {
            if s.label_write_failures > 0 {
                s.label_write_failures -= 1;
                return Err(unavailable("set_labels"));
            }
            let item = s.items.get_mut(item_id).ok_or_else(|| MailboxError::NotFound {
                what: format!("message {item_id}"),
            })?;
            item.labels.retain(|l| !remove.contains(l));
            item.labels.extend(add.iter().cloned());
            self.label_writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    async fn get_labels(&self, item_id: &str) -> Result<BTreeSet<String>, MailboxError> {
        self.with_state(|s| {
            if let Some((id, labels)) = s.relabel_on_read.take() {
                if let Some(item) = s.items.get_mut(&id) {
                    item.labels = labels;
                }
            }
            s.items
                .get(item_id)
                .map(|i| i.labels.clone())
                .ok_or_else(|| MailboxError::NotFound {
                    what: format!("message {item_id}"),
                })
        })
    }

    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchHit>, MailboxError> {
        Ok(self.with_state(|s| s.search_hits.iter().take(max_results).cloned().collect()))
    }
}

/// Drafter returning a fixed body and recording what it was asked.
pub(crate) struct FakeDrafter {
    reply: String,
    failures: AtomicUsize,
    calls: AtomicUsize,
    languages: Mutex<Vec<String>>,
}

impl FakeDrafter {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            failures: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            languages: Mutex::new(Vec::new()),
        }
    }

    /// The next `n` calls fail as unavailable.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Drafter for FakeDrafter {
    async fn compose(&self, request: DraftRequest<'_>) -> Result<String, DraftError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut langs) = self.languages.lock() {
            langs.push(request.language.to_string());
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DraftError::Unavailable("model overloaded".into()));
        }
        Ok(self.reply.clone())
    }
}
