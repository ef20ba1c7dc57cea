//! `search_emails`: find earlier mail the sender refers to.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use crate::mailbox::{Mailbox, SearchHit};
use crate::pipeline::types::Item;
use crate::tools::tool::{Tool, ToolError, ToolOutput, optional_count, require_str};

const DEFAULT_MAX_RESULTS: u64 = 5;
const MAX_RESULTS: u64 = 20;
const SUMMARY_RESULTS: usize = 5;
const MAX_KEYWORDS: usize = 3;

static REFERENCES_EARLIER_MAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(did you (get|see|read|review|receive|have a chance)|my (last|previous|earlier) (email|message|note)|as (i )?mentioned|following up|follow(ing)?-up on|(the|my) (proposal|document|report|attachment|contract|invoice|deck) (i|we) sent|sent you (the|a|my))",
    )
    .ok()
});

static SUBJECT_PREFIX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*((re|fwd?|aw|sv)\s*:\s*)+").ok());

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "from", "have", "just", "meeting", "quick", "question", "that",
    "this", "with", "your",
];

/// Subject words worth searching for: prefixes stripped, short and common words dropped.
pub fn subject_keywords(subject: &str) -> Vec<String> {
    let stripped = match SUBJECT_PREFIX.as_ref() {
        Some(re) => re.replace(subject, "").into_owned(),
        None => subject.to_string(),
    };
    stripped
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .take(MAX_KEYWORDS)
        .collect()
}

/// Gmail query for mail from `sender` mentioning the subject keywords.
pub fn build_query(sender: &str, subject: &str) -> String {
    let mut parts = vec![format!("from:{sender}")];
    parts.extend(subject_keywords(subject));
    parts.join(" ")
}

fn summarize(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No emails found matching: {query}");
    }
    let mut lines = vec![format!("Found {} email(s) matching '{query}':", hits.len())];
    lines.extend(hits.iter().take(SUMMARY_RESULTS).map(|h| match &h.date {
        Some(date) => format!("  - [{date}] {}: {}", h.sender, h.subject),
        None => format!("  - {}: {}", h.sender, h.subject),
    }));
    if hits.len() > SUMMARY_RESULTS {
        lines.push(format!("  ... and {} more", hits.len() - SUMMARY_RESULTS));
    }
    lines.join("\n")
}

pub struct SearchEmailsTool {
    mailbox: Arc<dyn Mailbox>,
}

impl SearchEmailsTool {
    pub fn new(mailbox: Arc<dyn Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SearchEmailsTool {
    fn name(&self) -> &str {
        "search_emails"
    }

    fn description(&self) -> &str {
        "Search past emails using Gmail query syntax. Applies when the sender \
         references a previous email, proposal, document, or conversation."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Gmail search query. Supports from:, to:, subject:, has:attachment, after:, before: and free text."
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (default: 5, max: 20)",
                    "default": DEFAULT_MAX_RESULTS
                }
            },
            "required": ["query"]
        })
    }

    fn plan(&self, item: &Item) -> Option<serde_json::Value> {
        REFERENCES_EARLIER_MAIL
            .as_ref()?
            .is_match(item.latest_body())
            .then(|| serde_json::json!({ "query": build_query(&item.sender, &item.subject) }))
    }

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let started = Instant::now();
        let query = require_str(&params, "query")?;
        let max_results = optional_count(&params, "max_results", DEFAULT_MAX_RESULTS, MAX_RESULTS);

        info!(query, "Searching emails");
        let hits = self.mailbox.search(query, max_results).await?;

        Ok(ToolOutput::success(
            serde_json::json!({
                "query": query,
                "total_count": hits.len(),
                "summary": summarize(query, &hits),
                "emails": hits,
            }),
            started.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMailbox, item};

    fn hit(n: usize) -> SearchHit {
        SearchHit {
            id: format!("h{n}"),
            thread_id: format!("t{n}"),
            sender: "Jane <jane@acme.com>".into(),
            subject: format!("Proposal v{n}"),
            snippet: "see attached".into(),
            date: Some("Jan 10, 2025".into()),
        }
    }

    #[test]
    fn query_from_sender_and_subject() {
        assert_eq!(
            build_query("jane@acme.com", "Re: Fwd: Q3 Budget proposal for review"),
            "from:jane@acme.com budget proposal review"
        );
        assert_eq!(build_query("a@b.com", "Re: hi"), "from:a@b.com");
    }

    #[test]
    fn plans_only_when_earlier_mail_is_referenced() {
        let tool = SearchEmailsTool::new(Arc::new(FakeMailbox::new()));
        let referenced = item("m1", "jane@acme.com", "Budget", "Did you get a chance to review my last email?");
        assert_eq!(
            tool.plan(&referenced).unwrap()["query"],
            "from:jane@acme.com budget"
        );
        let plain = item("m2", "jane@acme.com", "Budget", "Can we meet Thursday afternoon?");
        assert!(tool.plan(&plain).is_none());
    }

    #[tokio::test]
    async fn summarizes_up_to_five_hits() {
        let mailbox = Arc::new(FakeMailbox::new());
        mailbox.set_search_hits((0..7).map(hit).collect());
        let tool = SearchEmailsTool::new(mailbox);

        let out = tool
            .execute(serde_json::json!({"query": "from:jane@acme.com", "max_results": 7}))
            .await
            .unwrap();
        assert_eq!(out.result["total_count"], 7);
        let summary = out.result["summary"].as_str().unwrap();
        assert!(summary.starts_with("Found 7 email(s) matching 'from:jane@acme.com':"));
        assert!(summary.contains("  - [Jan 10, 2025] Jane <jane@acme.com>: Proposal v0"));
        assert!(summary.ends_with("  ... and 2 more"));
    }

    #[tokio::test]
    async fn empty_search_is_still_a_success() {
        let tool = SearchEmailsTool::new(Arc::new(FakeMailbox::new()));
        let out = tool.execute(serde_json::json!({"query": "invoice"})).await.unwrap();
        assert_eq!(out.result["summary"], "No emails found matching: invoice");
        assert!(tool.execute(serde_json::json!({"query": ""})).await.is_err());
    }
}
