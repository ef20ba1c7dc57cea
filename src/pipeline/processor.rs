//! Item processor: one eligible item from classification to its terminal outcome.
//!
//! ```text
//! CLASSIFY ─┬─ skip ──────────────────────────────────────▶ TERMINAL(skip)
//!           ├─ needs input ──────────────────────────────▶ TERMINAL(pending)
//!           └─ auto respond ─▶ PLAN ─▶ EXECUTE ─▶ COMPOSE ─▶ TERMINAL(sent)
//! ```
//!
//! Each stage takes the previous stage's value and returns a new one. Every
//! failure ends the item in `TERMINAL(error)` with its labels untouched, so
//! the item stays eligible and the next notification retries it.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::draft::{DraftRequest, Drafter, StyleHints};
use crate::error::ConfigError;
use crate::mailbox::Mailbox;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::labels::{LabelGate, LabelState};
use crate::pipeline::language::detect_language;
use crate::pipeline::types::{
    Draft, Item, LabelTransition, PipelineOutcome, Terminal, ToolPlan, ToolResult, Verdict,
};
use crate::retry::RetryPolicy;
use crate::safety::redact_for_logging;
use crate::store::ContactMemory;
use crate::tools::ToolRegistry;

/// Output of CLASSIFY.
#[derive(Debug, Clone)]
pub struct Classified {
    pub item: Item,
    pub verdict: Verdict,
}

/// Output of PLAN.
#[derive(Debug, Clone)]
pub struct Planned {
    pub item: Item,
    pub verdict: Verdict,
    pub plan: ToolPlan,
}

/// Output of EXECUTE. Results are in plan order.
#[derive(Debug, Clone)]
pub struct Executed {
    pub item: Item,
    pub verdict: Verdict,
    pub results: Vec<ToolResult>,
}

/// Output of COMPOSE.
#[derive(Debug, Clone)]
pub struct Composed {
    pub item: Item,
    pub verdict: Verdict,
    pub results: Vec<ToolResult>,
    pub draft: Draft,
}

/// Drives single items through the pipeline.
pub struct ItemProcessor {
    mailbox: Arc<dyn Mailbox>,
    classifier: Arc<Classifier>,
    tools: Arc<ToolRegistry>,
    drafter: Arc<dyn Drafter>,
    contacts: Option<Arc<dyn ContactMemory>>,
    gate: LabelGate,
    signature_html: Option<String>,
    retry: RetryPolicy,
}

impl ItemProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        classifier: Arc<Classifier>,
        tools: Arc<ToolRegistry>,
        drafter: Arc<dyn Drafter>,
        contacts: Option<Arc<dyn ContactMemory>>,
        gate: LabelGate,
        signature_html: Option<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            mailbox,
            classifier,
            tools,
            drafter,
            contacts,
            gate,
            signature_html,
            retry,
        }
    }

    /// Process one candidate. Never fails: errors become `Terminal::Error`.
    pub async fn process(&self, item_id: &str) -> PipelineOutcome {
        let item = match self
            .retry
            .run("fetch_item", || self.mailbox.fetch_item(item_id))
            .await
        {
            Ok(item) => item,
            Err(e) => {
                error!(item_id, error = %e, "Failed to fetch item");
                return PipelineOutcome::new(item_id, None, Terminal::Error).with_error(e);
            }
        };

        let state = self.gate.names().state(&item.labels);
        if state != LabelState::Eligible {
            debug!(item_id, state = state.as_str(), "Item not eligible, skipping");
            return PipelineOutcome::new(item_id, None, Terminal::Skip);
        }

        let classified = self.classify(item);
        match classified.verdict {
            Verdict::Skip { .. } => self.finish_skip(classified),
            Verdict::NeedsInput { .. } => self.finish_pending(classified).await,
            Verdict::AutoRespond { .. } => self.respond(classified).await,
        }
    }

    fn classify(&self, item: Item) -> Classified {
        let verdict = self.classifier.classify(&item);
        info!(
            item_id = %item.id,
            sender = %redact_for_logging(&item.sender),
            verdict = verdict.label(),
            tags = ?verdict.tags(),
            "Item classified"
        );
        Classified { item, verdict }
    }

    fn finish_skip(&self, classified: Classified) -> PipelineOutcome {
        debug!(item_id = %classified.item.id, "Skipping automated mail, labels untouched");
        PipelineOutcome::new(classified.item.id, Some(classified.verdict), Terminal::Skip)
    }

    async fn finish_pending(&self, classified: Classified) -> PipelineOutcome {
        let Classified { item, verdict } = classified;
        match self.gate.commit(&item.id, LabelTransition::EligibleToPending).await {
            Ok(true) => {
                info!(item_id = %item.id, "Escalated to owner");
                PipelineOutcome::new(item.id, Some(verdict), Terminal::Pending)
                    .with_transition(LabelTransition::EligibleToPending)
            }
            Ok(false) => PipelineOutcome::new(item.id, Some(verdict), Terminal::Skip),
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Failed to mark item pending");
                PipelineOutcome::new(item.id, Some(verdict), Terminal::Error).with_error(e)
            }
        }
    }

    async fn respond(&self, classified: Classified) -> PipelineOutcome {
        let planned = self.plan(classified);
        let executed = match self.execute(planned).await {
            Ok(executed) => executed,
            Err((item, verdict, e)) => {
                error!(item_id = %item.id, error = %e, "Tool plan rejected");
                return PipelineOutcome::new(item.id, Some(verdict), Terminal::Error).with_error(e);
            }
        };
        let composed = match self.compose(executed).await {
            Ok(composed) => composed,
            Err(outcome) => return outcome,
        };
        self.send(composed).await
    }

    fn plan(&self, classified: Classified) -> Planned {
        let plan = self.tools.plan(&classified.item);
        debug!(
            item_id = %classified.item.id,
            tools = ?plan.iter().map(|c| c.tool.as_str()).collect::<Vec<_>>(),
            "Tool plan"
        );
        Planned {
            item: classified.item,
            verdict: classified.verdict,
            plan,
        }
    }

    async fn execute(&self, planned: Planned) -> Result<Executed, (Item, Verdict, ConfigError)> {
        let Planned {
            item,
            verdict,
            plan,
        } = planned;
        let calls = plan
            .iter()
            .map(|call| self.tools.invoke(&call.tool, call.arguments.clone()));
        let results: Result<Vec<ToolResult>, ConfigError> =
            join_all(calls).await.into_iter().collect();
        match results {
            Ok(results) => Ok(Executed {
                item,
                verdict,
                results,
            }),
            Err(e) => Err((item, verdict, e)),
        }
    }

    async fn style_for(&self, sender: &str) -> Option<StyleHints> {
        let contacts = self.contacts.as_ref()?;
        match contacts.get(sender).await {
            Ok(style) => style,
            Err(e) => {
                warn!(error = %e, "Contact memory unavailable, drafting without style");
                None
            }
        }
    }

    async fn compose(&self, executed: Executed) -> Result<Composed, PipelineOutcome> {
        let Executed {
            item,
            verdict,
            results,
        } = executed;

        let language = item
            .language
            .clone()
            .unwrap_or_else(|| detect_language(&item.latest_text()).to_string());
        let style = self.style_for(&item.sender).await;
        let request = DraftRequest {
            item: &item,
            tool_results: &results,
            language: &language,
            style: style.as_ref(),
            signature: self.signature_html.as_deref(),
        };

        match self
            .retry
            .run("compose", || self.drafter.compose(request))
            .await
        {
            Ok(body) => {
                let draft = Draft {
                    item_id: item.id.clone(),
                    body,
                    signature_html: self.signature_html.clone(),
                };
                Ok(Composed {
                    item,
                    verdict,
                    results,
                    draft,
                })
            }
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Drafting failed, not sending");
                Err(PipelineOutcome::new(item.id, Some(verdict), Terminal::Error)
                    .with_tool_results(results)
                    .with_error(e))
            }
        }
    }

    async fn send(&self, composed: Composed) -> PipelineOutcome {
        let Composed {
            item,
            verdict,
            results,
            draft,
        } = composed;
        let outcome = |terminal| {
            PipelineOutcome::new(item.id.clone(), Some(verdict.clone()), terminal)
                .with_tool_results(results.clone())
        };

        match self.gate.check(&item.id).await {
            Ok(LabelState::Eligible) => {}
            Ok(state) => {
                info!(item_id = %item.id, state = state.as_str(), "Item moved before send, dropping draft");
                return outcome(Terminal::Skip);
            }
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Label re-read failed, not sending");
                return outcome(Terminal::Error).with_error(e);
            }
        }

        let sent_id = match self
            .retry
            .run("send", || self.mailbox.send(&item, &draft))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                error!(item_id = %item.id, error = %e, "Send failed");
                return outcome(Terminal::Error).with_error(e);
            }
        };
        info!(item_id = %item.id, sent_id = %sent_id, "Reply sent");

        if let Err(e) = self.gate.apply(&item.id, LabelTransition::EligibleToDone).await {
            error!(item_id = %item.id, error = %e, "Reply sent but labelling failed");
            return outcome(Terminal::Error).with_sent(true).with_error(e);
        }

        if let Some(contacts) = &self.contacts
            && let Err(e) = contacts.record_reply(&item.sender, &draft.body).await
        {
            warn!(item_id = %item.id, error = %e, "Failed to update contact style");
        }

        outcome(Terminal::Sent)
            .with_sent(true)
            .with_transition(LabelTransition::EligibleToDone)
    }
}
