//! Gmail REST implementation of [`Mailbox`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::draft::format;
use crate::error::MailboxError;
use crate::google::{GoogleClient, string_u64};
use crate::mailbox::labels::LabelCache;
use crate::mailbox::message::{build_reply, parse_raw};
use crate::mailbox::{
    HistoryChange, HistoryDelta, Mailbox, SearchHit, WatchRenewal, WatchStatus,
};
use crate::pipeline::types::{ChangeCursor, Draft, Item, ThreadMessage};
use crate::safety::redact_for_logging;

/// Thread context fetched per item, newest messages kept.
const MAX_THREAD_MESSAGES: usize = 10;
/// Fallback listing size when history is no longer available.
const RECOVERY_LIST_SIZE: usize = 100;

/// Gmail's `raw` field: URL-safe alphabet, padding optional on input.
const RAW_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRef {
    id: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    label_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryList {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    next_page_token: Option<String>,
    #[serde(default, with = "string_u64::option")]
    history_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
    #[serde(default)]
    labels_added: Vec<LabelsAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: MessageRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelsAdded {
    message: MessageRef,
    #[serde(default)]
    label_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    raw: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MinimalMessage {
    id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default, with = "string_u64::option")]
    internal_date: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MinimalThread {
    #[serde(default)]
    messages: Vec<MinimalMessage>,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    messages: Vec<MessageRef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataMessage {
    id: String,
    thread_id: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<LabelInfo>,
}

#[derive(Debug, Deserialize)]
struct LabelInfo {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    #[serde(with = "string_u64")]
    history_id: u64,
    #[serde(default, with = "string_u64::option")]
    expiration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

// ── Mailbox ─────────────────────────────────────────────────────────

pub struct GmailMailbox {
    client: GoogleClient,
    base_url: String,
    labels: RwLock<LabelCache>,
    respond_label: String,
    user_email: OnceCell<String>,
    pubsub_topic: Option<String>,
}

impl GmailMailbox {
    pub fn new(
        client: GoogleClient,
        google: &GoogleConfig,
        respond_label: impl Into<String>,
        user_email: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: google.gmail_base_url.trim_end_matches('/').to_string(),
            labels: RwLock::new(LabelCache::default()),
            respond_label: respond_label.into(),
            user_email: OnceCell::new_with(user_email),
            pubsub_topic: google.pubsub_topic.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn refresh_labels(&self) -> Result<(), MailboxError> {
        let list: LabelList = self
            .client
            .get_json("labels.list", &self.url("labels"), &[])
            .await?;
        let cache = LabelCache::from_pairs(list.labels.into_iter().map(|l| (l.id, l.name)));
        debug!(count = cache.len(), "Label cache refreshed");
        *self.labels.write().await = cache;
        Ok(())
    }

    /// Create any of `names` that do not exist yet.
    pub async fn ensure_labels(&self, names: &[String]) -> Result<(), MailboxError> {
        self.refresh_labels().await?;
        let missing = self.labels.read().await.missing(names);
        for name in missing {
            let created: LabelInfo = self
                .client
                .post_json(
                    "labels.create",
                    &self.url("labels"),
                    &json!({
                        "name": name,
                        "labelListVisibility": "labelShow",
                        "messageListVisibility": "show",
                    }),
                )
                .await?;
            info!(label = %created.name, id = %created.id, "Created label");
            self.labels.write().await.insert(created.id, created.name);
        }
        Ok(())
    }

    async fn label_id(&self, name: &str) -> Result<String, MailboxError> {
        if let Some(id) = self.labels.read().await.id_for(name) {
            return Ok(id.to_string());
        }
        self.refresh_labels().await?;
        self.labels
            .read()
            .await
            .id_for(name)
            .map(str::to_string)
            .ok_or_else(|| MailboxError::UnknownLabel {
                name: name.to_string(),
            })
    }

    async fn label_ids(&self, names: &BTreeSet<String>) -> Result<Vec<String>, MailboxError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            ids.push(self.label_id(name).await?);
        }
        Ok(ids)
    }

    async fn label_names(&self, ids: &[String]) -> Result<BTreeSet<String>, MailboxError> {
        let stale = {
            let cache = self.labels.read().await;
            ids.iter()
                .any(|id| id.starts_with("Label_") && !cache.contains_id(id))
        };
        if stale {
            self.refresh_labels().await?;
        }
        Ok(self.labels.read().await.names_for(ids))
    }

    async fn user_email(&self) -> Result<String, MailboxError> {
        self.user_email
            .get_or_try_init(|| async {
                let profile: Profile = self
                    .client
                    .get_json("users.getProfile", &self.url("profile"), &[])
                    .await?;
                Ok::<_, MailboxError>(profile.email_address)
            })
            .await
            .cloned()
    }

    async fn fetch_raw(&self, id: &str) -> Result<(RawMessage, Vec<u8>), MailboxError> {
        let message: RawMessage = self
            .client
            .get_json(
                "messages.get",
                &self.url(&format!("messages/{id}")),
                &[("format", "raw".to_string())],
            )
            .await?;
        let bytes = RAW_ENGINE
            .decode(message.raw.as_bytes())
            .map_err(|e| MailboxError::InvalidResponse {
                op: "messages.get".into(),
                reason: format!("raw body is not base64url: {e}"),
            })?;
        Ok((message, bytes))
    }

    async fn fetch_thread_message(&self, id: &str) -> Result<ThreadMessage, MailboxError> {
        let (_, bytes) = self.fetch_raw(id).await?;
        let parsed = parse_raw(&bytes).ok_or_else(|| MailboxError::InvalidResponse {
            op: "messages.get".into(),
            reason: format!("message {id} is not RFC 822"),
        })?;
        Ok(ThreadMessage {
            sender: parsed.from,
            body: parsed.body,
            timestamp: parsed.date,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MetadataMessage, MailboxError> {
        let url = self.url(&format!("messages/{id}"));
        self.client
            .get_json("messages.get", &url, &metadata_query())
            .await
    }

    /// Messages currently carrying the respond label, used when history is gone.
    async fn list_flagged(&self, respond_id: &str) -> Result<HistoryDelta, MailboxError> {
        let list: MessageList = self
            .client
            .get_json(
                "messages.list",
                &self.url("messages"),
                &[
                    ("labelIds", respond_id.to_string()),
                    ("maxResults", RECOVERY_LIST_SIZE.to_string()),
                ],
            )
            .await?;
        let changes = list
            .messages
            .into_iter()
            .map(|m| HistoryChange {
                item_id: m.id,
                thread_id: m.thread_id,
                labels_added: BTreeSet::from([self.respond_label.clone()]),
            })
            .collect();
        Ok(HistoryDelta {
            changes,
            latest: None,
        })
    }
}

/// Turn history records into changes. New messages without a label list
/// were returned by a `labelId` filter, so they carry `filtered_label`.
fn history_changes(
    records: Vec<HistoryRecord>,
    names: &LabelCache,
    filtered_label: &str,
) -> Vec<HistoryChange> {
    let mut changes = Vec::new();
    for record in records {
        for added in record.messages_added {
            let labels_added = match &added.message.label_ids {
                Some(ids) => names.names_for(ids),
                None => BTreeSet::from([filtered_label.to_string()]),
            };
            changes.push(HistoryChange {
                item_id: added.message.id,
                thread_id: added.message.thread_id,
                labels_added,
            });
        }
        for added in record.labels_added {
            changes.push(HistoryChange {
                labels_added: names.names_for(&added.label_ids),
                item_id: added.message.id,
                thread_id: added.message.thread_id,
            });
        }
    }
    changes
}

/// Query for a header-only `messages.get`, enough to build a search hit.
fn metadata_query() -> [(&'static str, String); 4] {
    [
        ("format", "metadata".to_string()),
        ("metadataHeaders", "From".to_string()),
        ("metadataHeaders", "Subject".to_string()),
        ("metadataHeaders", "Date".to_string()),
    ]
}

fn search_hit(message: MetadataMessage) -> SearchHit {
    let header = |name: &str| {
        message
            .payload
            .as_ref()
            .and_then(|p| p.headers.iter().find(|h| h.name.eq_ignore_ascii_case(name)))
            .map(|h| h.value.clone())
    };
    SearchHit {
        sender: header("From").unwrap_or_default(),
        subject: header("Subject").unwrap_or_default(),
        date: header("Date"),
        id: message.id,
        thread_id: message.thread_id,
        snippet: message.snippet,
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn fetch_item(&self, item_id: &str) -> Result<Item, MailboxError> {
        let (message, bytes) = self.fetch_raw(item_id).await?;
        let parsed = parse_raw(&bytes).ok_or_else(|| MailboxError::InvalidResponse {
            op: "messages.get".into(),
            reason: format!("message {item_id} is not RFC 822"),
        })?;

        let thread: MinimalThread = self
            .client
            .get_json(
                "threads.get",
                &self.url(&format!("threads/{}", message.thread_id)),
                &[("format", "minimal".to_string())],
            )
            .await?;

        let mut earlier = thread.messages;
        earlier.sort_by_key(|m| m.internal_date.unwrap_or(0));
        let position = earlier.iter().position(|m| m.id == item_id);
        earlier.truncate(position.unwrap_or(earlier.len()));
        earlier.retain(|m| m.id != item_id);
        let skip = earlier.len().saturating_sub(MAX_THREAD_MESSAGES - 1);

        let mut messages = try_join_all(
            earlier[skip..]
                .iter()
                .map(|m| self.fetch_thread_message(&m.id)),
        )
        .await?;
        messages.push(ThreadMessage {
            sender: parsed.from.clone(),
            body: parsed.body,
            timestamp: parsed.date,
        });

        let labels = self.label_names(&message.label_ids).await?;
        debug!(
            item_id,
            sender = %redact_for_logging(&parsed.from),
            thread_len = messages.len(),
            "Fetched item"
        );

        Ok(Item {
            id: item_id.to_string(),
            thread_id: message.thread_id,
            labels,
            sender: parsed.from,
            sender_name: parsed.from_name,
            subject: parsed.subject,
            messages,
            language: None,
            message_id_header: parsed.message_id,
            references: parsed.references,
        })
    }

    async fn fetch_history_since(&self, cursor: ChangeCursor) -> Result<HistoryDelta, MailboxError> {
        let respond_id = self.label_id(&self.respond_label).await?;
        let mut records = Vec::new();
        let mut latest: Option<u64> = None;
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("startHistoryId", cursor.value().to_string()),
                ("labelId", respond_id.clone()),
                ("historyTypes", "messageAdded".to_string()),
                ("historyTypes", "labelAdded".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("pageToken", token.clone()));
            }

            let page: HistoryList = match self
                .client
                .get_json("history.list", &self.url("history"), &query)
                .await
            {
                Ok(page) => page,
                Err(MailboxError::NotFound { .. }) => {
                    warn!(cursor = %cursor, "History no longer available, listing flagged messages");
                    return self.list_flagged(&respond_id).await;
                }
                Err(e) => return Err(e),
            };

            latest = latest.max(page.history_id);
            records.extend(page.history);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        let changes = {
            let names = self.labels.read().await;
            history_changes(records, &names, &self.respond_label)
        };
        Ok(HistoryDelta {
            changes,
            latest: latest.map(ChangeCursor),
        })
    }

    async fn send(&self, item: &Item, draft: &Draft) -> Result<String, MailboxError> {
        let from = self.user_email().await?;
        let raw = build_reply(
            item,
            &from,
            format::render_plain(draft),
            format::render_html(draft),
        )?;
        let sent: SentMessage = self
            .client
            .post_json(
                "messages.send",
                &self.url("messages/send"),
                &json!({
                    "raw": RAW_ENGINE.encode(raw),
                    "threadId": item.thread_id,
                }),
            )
            .await?;
        info!(
            item_id = %item.id,
            sent_id = %sent.id,
            to = %redact_for_logging(&item.sender),
            "Reply sent"
        );
        Ok(sent.id)
    }

    async fn set_labels(
        &self,
        item_id: &str,
        add: &BTreeSet<String>,
        remove: &BTreeSet<String>,
    ) -> Result<(), MailboxError> {
        let add_ids = self.label_ids(add).await?;
        let remove_ids = self.label_ids(remove).await?;
        let _: serde_json::Value = self
            .client
            .post_json(
                "messages.modify",
                &self.url(&format!("messages/{item_id}/modify")),
                &json!({ "addLabelIds": add_ids, "removeLabelIds": remove_ids }),
            )
            .await?;
        debug!(item_id, ?add, ?remove, "Labels modified");
        Ok(())
    }

    async fn get_labels(&self, item_id: &str) -> Result<BTreeSet<String>, MailboxError> {
        let message: MinimalMessage = self
            .client
            .get_json(
                "messages.get",
                &self.url(&format!("messages/{item_id}")),
                &[("format", "minimal".to_string())],
            )
            .await?;
        self.label_names(&message.label_ids).await
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, MailboxError> {
        let list: MessageList = self
            .client
            .get_json(
                "messages.list",
                &self.url("messages"),
                &[
                    ("q", query.to_string()),
                    ("maxResults", max_results.to_string()),
                ],
            )
            .await?;

        let metadata = try_join_all(
            list.messages
                .iter()
                .take(max_results)
                .map(|m| self.fetch_metadata(&m.id)),
        )
        .await?;
        Ok(metadata.into_iter().map(search_hit).collect())
    }
}

#[async_trait]
impl WatchRenewal for GmailMailbox {
    async fn renew_watch(&self) -> Result<WatchStatus, MailboxError> {
        let topic = self.pubsub_topic.as_deref().ok_or_else(|| {
            MailboxError::NotConfigured("GCP_PROJECT_ID or GMAIL_PUBSUB_TOPIC".into())
        })?;
        let respond_id = self.label_id(&self.respond_label).await?;
        let response: WatchResponse = self
            .client
            .post_json(
                "users.watch",
                &self.url("watch"),
                &json!({
                    "topicName": topic,
                    "labelIds": [respond_id],
                    "labelFilterBehavior": "INCLUDE",
                }),
            )
            .await?;
        info!(
            history_id = response.history_id,
            expiration = ?response.expiration,
            "Gmail watch renewed"
        );
        Ok(WatchStatus {
            cursor: ChangeCursor(response.history_id),
            expiration_ms: response.expiration,
        })
    }
}
