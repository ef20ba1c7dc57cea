//! Persistence traits: the change cursor and per-contact style memory.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::draft::style::{self, ContactProfile, StyleHints};
use crate::error::DatabaseError;
use crate::pipeline::sender::normalize_address;
use crate::pipeline::types::ChangeCursor;

/// Durable home of the last fully-processed change cursor.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn read(&self) -> Result<Option<ChangeCursor>, DatabaseError>;

    /// Write `new` only if the stored value still equals `expected`.
    ///
    /// `expected = None` means "no value stored yet". Returns whether the
    /// write happened.
    async fn compare_and_swap(
        &self,
        expected: Option<ChangeCursor>,
        new: ChangeCursor,
    ) -> Result<bool, DatabaseError>;
}

/// Per-contact style memory.
///
/// Backends implement `load`/`save`; the learning flow is shared.
#[async_trait]
pub trait ContactMemory: Send + Sync {
    /// Raw profile by normalized address, expired or not.
    async fn load(&self, email: &str) -> Result<Option<ContactProfile>, DatabaseError>;

    async fn save(&self, profile: &ContactProfile) -> Result<(), DatabaseError>;

    /// Style hints for `sender`, if a live profile exists.
    async fn get(&self, sender: &str) -> Result<Option<StyleHints>, DatabaseError> {
        let email = normalize_address(sender);
        let now = Utc::now();
        Ok(self
            .load(&email)
            .await?
            .filter(|p| !p.is_expired(now))
            .map(|p| p.style))
    }

    /// Learn from a reply we sent to `recipient`.
    async fn record_reply(&self, recipient: &str, body: &str) -> Result<(), DatabaseError> {
        let email = normalize_address(recipient);
        let now = Utc::now();
        let sample = style::analyze(body);
        let style = match self.load(&email).await? {
            Some(existing) if !existing.is_expired(now) => existing.style.merge(&sample),
            _ => sample,
        };
        debug!(
            tone = style.tone.as_str(),
            formality = style.formality,
            samples = style.sample_count,
            "Updated contact style"
        );
        self.save(&ContactProfile {
            email,
            style,
            updated_at: now,
        })
        .await
    }
}
