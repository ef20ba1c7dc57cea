//! Notification entry point.
//!
//! One notification resolves to a batch of candidates. Candidates run
//! concurrently and independently; the cursor is committed only after every
//! candidate has reached a terminal outcome. A failed commit is reported
//! alongside the outcomes, never instead of them.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::cursor::CursorTracker;
use crate::pipeline::processor::ItemProcessor;
use crate::pipeline::types::{ChangeCursor, PipelineOutcome, Terminal};

/// What one notification did.
#[derive(Debug, Clone)]
pub struct NotificationReport {
    pub run_id: Uuid,
    /// The notification only established the first cursor.
    pub baseline: bool,
    pub outcomes: Vec<PipelineOutcome>,
    /// Set when the cursor could not be persisted after processing. The same
    /// history is then replayed next time and stopped by the label gate.
    pub cursor_error: Option<String>,
}

impl NotificationReport {
    pub fn count(&self, terminal: Terminal) -> usize {
        self.outcomes.iter().filter(|o| o.terminal == terminal).count()
    }
}

pub struct NotificationHandler {
    tracker: CursorTracker,
    processor: Arc<ItemProcessor>,
}

impl NotificationHandler {
    pub fn new(tracker: CursorTracker, processor: Arc<ItemProcessor>) -> Self {
        Self { tracker, processor }
    }

    /// Process everything that became eligible up to `cursor`.
    pub async fn handle_notification(
        &self,
        cursor: ChangeCursor,
    ) -> Result<Vec<PipelineOutcome>, PipelineError> {
        Ok(self.handle(cursor).await?.outcomes)
    }

    /// Like [`handle_notification`](Self::handle_notification), with run metadata.
    pub async fn handle(&self, cursor: ChangeCursor) -> Result<NotificationReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("notification", run_id = %run_id, cursor = %cursor);
        self.run(run_id, cursor).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        cursor: ChangeCursor,
    ) -> Result<NotificationReport, PipelineError> {
        let resolution = self.tracker.resolve_new_items(cursor).await?;

        let outcomes: Vec<PipelineOutcome> = join_all(
            resolution
                .candidates
                .iter()
                .map(|id| self.processor.process(id)),
        )
        .await;

        // Failed items keep their eligibility label, which is how they get
        // picked up again; the cursor moves regardless.
        let cursor_error = match self.tracker.commit(&resolution).await {
            Ok(_) => None,
            Err(e) => {
                for o in &outcomes {
                    error!(
                        item_id = %o.item_id,
                        terminal = ?o.terminal,
                        sent = o.sent,
                        "Processed before cursor commit failed"
                    );
                }
                error!(error = %e, candidates = outcomes.len(), "Cursor commit failed");
                Some(e.to_string())
            }
        };

        let report = NotificationReport {
            run_id,
            baseline: resolution.is_baseline(),
            outcomes,
            cursor_error,
        };
        info!(
            candidates = report.outcomes.len(),
            sent = report.count(Terminal::Sent),
            pending = report.count(Terminal::Pending),
            skipped = report.count(Terminal::Skip),
            errors = report.count(Terminal::Error),
            baseline = report.baseline,
            "Notification handled"
        );
        Ok(report)
    }
}
