//! Change cursor tracker: the single deduplication authority for notifications.
//!
//! `resolve_new_items` turns a notified cursor into candidate item ids.
//! `commit` persists the new cursor with compare-and-swap once every
//! candidate has been handed off, so a crash in between re-delivers
//! instead of losing items.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::PipelineError;
use crate::mailbox::Mailbox;
use crate::pipeline::types::ChangeCursor;
use crate::retry::RetryPolicy;
use crate::store::CursorStore;

/// Candidates for one notification plus the cursor to persist afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Distinct item ids, in the order the mailbox reported them.
    pub candidates: Vec<String>,
    /// Value to persist after processing. `None` when nothing moves.
    pub cursor_to_persist: Option<ChangeCursor>,
    /// Stored cursor at resolution time (the CAS expectation).
    pub previous: Option<ChangeCursor>,
}

impl Resolution {
    /// True when this notification only established the first baseline.
    pub fn is_baseline(&self) -> bool {
        self.previous.is_none() && self.cursor_to_persist.is_some()
    }
}

pub struct CursorTracker {
    store: Arc<dyn CursorStore>,
    mailbox: Arc<dyn Mailbox>,
    eligible_label: String,
    retry: RetryPolicy,
}

impl CursorTracker {
    pub fn new(
        store: Arc<dyn CursorStore>,
        mailbox: Arc<dyn Mailbox>,
        eligible_label: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            mailbox,
            eligible_label: eligible_label.into(),
            retry,
        }
    }

    pub async fn resolve_new_items(
        &self,
        notified: ChangeCursor,
    ) -> Result<Resolution, PipelineError> {
        let Some(stored) = self.store.read().await? else {
            info!(cursor = %notified, "No stored cursor, using notification as baseline");
            return Ok(Resolution {
                candidates: Vec::new(),
                cursor_to_persist: Some(notified),
                previous: None,
            });
        };

        if notified <= stored {
            debug!(notified = %notified, stored = %stored, "Notification already covered");
            return Ok(Resolution {
                candidates: Vec::new(),
                cursor_to_persist: None,
                previous: Some(stored),
            });
        }

        let delta = self
            .retry
            .run("fetch_history_since", || self.mailbox.fetch_history_since(stored))
            .await?;

        let mut seen = HashSet::new();
        let candidates: Vec<String> = delta
            .changes
            .into_iter()
            .filter(|change| change.labels_added.contains(&self.eligible_label))
            .filter(|change| seen.insert(change.item_id.clone()))
            .map(|change| change.item_id)
            .collect();

        let persist = delta.latest.map_or(notified, |latest| latest.max(notified));

        info!(
            from = %stored,
            to = %persist,
            candidates = candidates.len(),
            "Resolved notification"
        );

        Ok(Resolution {
            candidates,
            cursor_to_persist: Some(persist),
            previous: Some(stored),
        })
    }

    /// Persist the resolution's cursor. Never moves the stored value backward.
    ///
    /// Returns `true` if this call wrote the value.
    pub async fn commit(&self, resolution: &Resolution) -> Result<bool, PipelineError> {
        let Some(new) = resolution.cursor_to_persist else {
            return Ok(false);
        };

        let mut expected = resolution.previous;
        loop {
            if self.store.compare_and_swap(expected, new).await? {
                debug!(cursor = %new, "Cursor persisted");
                return Ok(true);
            }
            let current = self.store.read().await?;
            match current {
                Some(c) if c >= new => {
                    debug!(current = %c, new = %new, "Cursor already ahead, not persisting");
                    return Ok(false);
                }
                _ => expected = current,
            }
        }
    }
}
