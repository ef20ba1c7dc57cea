//! Label state machine.
//!
//! ```text
//! UNTRACKED ──(human adds respond)──▶ ELIGIBLE ──(sent)──────▶ DONE
//!                                        │
//!                                        └──(needs input)──▶ PENDING ──(human)──▶ DONE
//! ```
//!
//! The engine only writes ELIGIBLE → DONE and ELIGIBLE → PENDING. Labels are
//! the sole record of progress, so every write is preceded by a fresh read.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::MailboxError;
use crate::mailbox::Mailbox;
use crate::pipeline::types::LabelTransition;
use crate::retry::RetryPolicy;

/// Names of the three lifecycle labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelNames {
    pub respond: String,
    pub pending: String,
    pub done: String,
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            respond: "Agent Respond".into(),
            pending: "Agent Pending".into(),
            done: "Agent Done".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelState {
    /// Respond label present, no pending or done label.
    Eligible,
    Pending,
    Done,
    /// No lifecycle label at all.
    Untracked,
}

impl LabelState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eligible => "eligible",
            Self::Pending => "pending",
            Self::Done => "done",
            Self::Untracked => "untracked",
        }
    }
}

impl LabelNames {
    /// Done beats pending beats respond, so a stale respond label never
    /// re-opens a finished item.
    pub fn state(&self, labels: &BTreeSet<String>) -> LabelState {
        if labels.contains(&self.done) {
            LabelState::Done
        } else if labels.contains(&self.pending) {
            LabelState::Pending
        } else if labels.contains(&self.respond) {
            LabelState::Eligible
        } else {
            LabelState::Untracked
        }
    }

    pub fn is_eligible(&self, labels: &BTreeSet<String>) -> bool {
        self.state(labels) == LabelState::Eligible
    }

    /// `(add, remove)` for a transition.
    pub fn mutation(&self, transition: LabelTransition) -> (BTreeSet<String>, BTreeSet<String>) {
        let target = match transition {
            LabelTransition::EligibleToDone => &self.done,
            LabelTransition::EligibleToPending => &self.pending,
        };
        (
            BTreeSet::from([target.clone()]),
            BTreeSet::from([self.respond.clone()]),
        )
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.respond.clone(), self.pending.clone(), self.done.clone()]
    }
}

/// Reads and writes lifecycle labels through the mailbox.
pub struct LabelGate {
    mailbox: Arc<dyn Mailbox>,
    names: LabelNames,
    retry: RetryPolicy,
}

impl LabelGate {
    pub fn new(mailbox: Arc<dyn Mailbox>, names: LabelNames, retry: RetryPolicy) -> Self {
        Self {
            mailbox,
            names,
            retry,
        }
    }

    pub fn names(&self) -> &LabelNames {
        &self.names
    }

    /// Fresh label state from the mailbox.
    pub async fn check(&self, item_id: &str) -> Result<LabelState, MailboxError> {
        let labels = self
            .retry
            .run("get_labels", || self.mailbox.get_labels(item_id))
            .await?;
        let state = self.names.state(&labels);
        debug!(item_id, state = state.as_str(), "Label gate read");
        Ok(state)
    }

    /// Apply `transition` if the item is still eligible.
    ///
    /// Returns `false` (and writes nothing) when someone else already moved it.
    pub async fn commit(
        &self,
        item_id: &str,
        transition: LabelTransition,
    ) -> Result<bool, MailboxError> {
        if self.check(item_id).await? != LabelState::Eligible {
            debug!(item_id, ?transition, "Item left eligible state, not relabelling");
            return Ok(false);
        }
        self.apply(item_id, transition).await?;
        Ok(true)
    }

    /// Apply `transition` without re-reading. Used right after a confirmed
    /// send, where the pre-send read already closed the window.
    pub async fn apply(
        &self,
        item_id: &str,
        transition: LabelTransition,
    ) -> Result<(), MailboxError> {
        let (add, remove) = self.names.mutation(transition);
        self.retry
            .run("set_labels", || self.mailbox.set_labels(item_id, &add, &remove))
            .await?;
        info!(item_id, ?transition, "Labels updated");
        Ok(())
    }
}
