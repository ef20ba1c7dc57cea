//! End-to-end notification handling against in-memory collaborators.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::*;
use mail_triage::error::ToolError;
use mail_triage::mailbox::SearchHit;
use mail_triage::pipeline::{ChangeCursor, LabelTransition, Terminal, Verdict};
use mail_triage::store::{ContactMemory, CursorStore};
use mail_triage::tools::ToolRegistry;
use mail_triage::tools::builtin::{CalendarBackend, CalendarCheckTool, SearchEmailsTool};

struct DownCalendar;

#[async_trait]
impl CalendarBackend for DownCalendar {
    async fn busy(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ToolError> {
        Err(ToolError::ExecutionFailed("calendar API returned 500".into()))
    }
}

struct EmptyCalendar;

#[async_trait]
impl CalendarBackend for EmptyCalendar {
    async fn busy(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>, ToolError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn scenario_a_meeting_request_is_answered_then_done() {
    let w = world(
        Some(100),
        ToolRegistry::new(retry()).with(Arc::new(CalendarCheckTool::new(Arc::new(EmptyCalendar)))),
    );
    w.mailbox.deliver(email(
        "a1",
        "john@company.com",
        "Quick sync",
        "Can we meet Thursday afternoon?",
    ));
    w.mailbox.set_latest(101);

    let outcomes = w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(matches!(outcome.verdict, Some(Verdict::AutoRespond { .. })));
    assert_eq!(outcome.terminal, Terminal::Sent);
    assert_eq!(outcome.transition, Some(LabelTransition::EligibleToDone));
    assert!(outcome.tool_results.iter().all(|r| r.tool == "calendar_check"));

    assert_eq!(w.mailbox.sent().len(), 1);
    assert_eq!(w.mailbox.labels_of("a1"), labels(&[DONE, "INBOX"]));
    assert!(w.contacts.get("john@company.com").await.unwrap().is_some());
}

#[tokio::test]
async fn scenario_b_options_with_prices_escalate_without_sending() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.deliver(email(
        "b1",
        "ceo@bigcorp.com",
        "Proposal",
        "Option A: $10,000 ... Option B: $15,000 ... Which would you prefer?",
    ));

    let outcomes = w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    assert!(matches!(outcomes[0].verdict, Some(Verdict::NeedsInput { .. })));
    assert_eq!(outcomes[0].terminal, Terminal::Pending);
    assert_eq!(outcomes[0].transition, Some(LabelTransition::EligibleToPending));
    assert!(w.mailbox.sent().is_empty());
    assert!(w.drafter.tool_results_seen().is_empty());
    assert_eq!(w.mailbox.labels_of("b1"), labels(&[PENDING, "INBOX"]));
}

#[tokio::test]
async fn scenario_c_automated_sender_causes_no_mutation() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.deliver(email(
        "c1",
        "noreply@service.com",
        "Can we meet?",
        "Option A: $5 or option B: $6?",
    ));

    let outcomes = w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    assert!(matches!(outcomes[0].verdict, Some(Verdict::Skip { .. })));
    assert_eq!(outcomes[0].terminal, Terminal::Skip);
    assert_eq!(w.mailbox.mutations(), 0);
}

#[tokio::test]
async fn scenario_d_failed_tool_does_not_block_the_reply() {
    let tools = ToolRegistry::new(retry())
        .with(Arc::new(CalendarCheckTool::new(Arc::new(DownCalendar))))
        .with(Arc::new(SearchEmailsTool::new(MemoryMailbox::new())));
    let w = world(Some(100), tools);
    w.mailbox.deliver(email(
        "d1",
        "john@company.com",
        "Re: Roadmap",
        "Following up on my last email. Can we meet Thursday afternoon to go over it?",
    ));

    let outcomes = w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    let outcome = &outcomes[0];
    assert_eq!(outcome.terminal, Terminal::Sent, "{outcome:?}");

    let seen = w.drafter.tool_results_seen();
    assert_eq!(seen.len(), 1);
    let results = &seen[0];
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].tool, "calendar_check");
    assert!(!results[0].success);
    assert_eq!(results[1].tool, "search_emails");
    assert!(results[1].success);
}

#[tokio::test]
async fn search_results_reach_the_drafter() {
    let archive = MemoryMailbox::new();
    archive.set_search_hits(vec![SearchHit {
        id: "old".into(),
        thread_id: "t-old".into(),
        sender: "john@company.com".into(),
        subject: "Roadmap draft".into(),
        snippet: "Attached is the roadmap".into(),
        date: None,
    }]);
    let w = world(
        Some(100),
        ToolRegistry::new(retry()).with(Arc::new(SearchEmailsTool::new(archive))),
    );
    w.mailbox.deliver(email(
        "s1",
        "john@company.com",
        "Roadmap",
        "Did you get a chance to read the roadmap I sent you?",
    ));

    w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    let seen = w.drafter.tool_results_seen();
    let search = seen[0]
        .iter()
        .find(|r| r.tool == "search_emails")
        .expect("search planned");
    assert!(search.success);
    assert_eq!(search.payload["total_count"], 1);
}

#[tokio::test]
async fn second_notification_for_a_finished_item_does_nothing() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.deliver(email(
        "i1",
        "john@company.com",
        "Quick sync",
        "Can we meet Thursday afternoon?",
    ));
    w.mailbox.deliver(email(
        "i2",
        "ceo@bigcorp.com",
        "Proposal",
        "Option A: $10,000 ... Option B: $15,000 ... Which would you prefer?",
    ));

    w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    let mutations = w.mailbox.mutations();

    // The stored cursor now covers 101; redelivery of a later cursor still
    // lists the same history, but both items are out of the eligible state.
    let outcomes = w.handler.handle_notification(ChangeCursor(102)).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.terminal == Terminal::Skip && o.verdict.is_none()));
    assert_eq!(w.mailbox.mutations(), mutations);
    assert_eq!(w.mailbox.sent().len(), 1);
}

#[tokio::test]
async fn stale_notification_is_ignored() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.deliver(email("x1", "john@company.com", "Sync", "Can we meet?"));

    let outcomes = w.handler.handle_notification(ChangeCursor(90)).await.unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(w.cursors.read().await.unwrap(), Some(ChangeCursor(100)));
    assert_eq!(w.mailbox.mutations(), 0);
}

#[tokio::test]
async fn concurrent_notifications_never_regress_the_cursor() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.set_latest(105);

    let (a, b) = tokio::join!(
        w.handler.handle_notification(ChangeCursor(110)),
        w.handler.handle_notification(ChangeCursor(103)),
    );
    a.unwrap();
    b.unwrap();
    assert_eq!(w.cursors.read().await.unwrap(), Some(ChangeCursor(110)));
}

#[tokio::test]
async fn human_taking_over_mid_flight_wins() {
    let w = world(Some(100), ToolRegistry::new(retry()));
    w.mailbox.deliver(email(
        "r1",
        "john@company.com",
        "Quick sync",
        "Can we meet Thursday afternoon?",
    ));
    w.mailbox
        .human_relabels_before_next_read("r1", &[RESPOND, DONE, "INBOX"]);

    let outcomes = w.handler.handle_notification(ChangeCursor(101)).await.unwrap();
    assert_eq!(outcomes[0].terminal, Terminal::Skip);
    assert!(w.mailbox.sent().is_empty());
    assert_eq!(w.mailbox.mutations(), 0);
}

#[tokio::test]
async fn first_notification_only_sets_the_baseline() {
    let w = world(None, ToolRegistry::new(retry()));
    w.mailbox.deliver(email("f1", "john@company.com", "Sync", "Can we meet?"));

    let outcomes = w.handler.handle_notification(ChangeCursor(500)).await.unwrap();
    assert!(outcomes.is_empty());
    assert_eq!(w.cursors.read().await.unwrap(), Some(ChangeCursor(500)));
    assert_eq!(w.mailbox.mutations(), 0);
}
