//! Reply drafting: the drafting seam, style memory and output formatting.

pub mod format;
pub mod generator;
pub mod style;

use async_trait::async_trait;

use crate::error::DraftError;
use crate::pipeline::types::{Item, ToolResult};

pub use generator::LlmDrafter;
pub use style::StyleHints;

/// Everything the drafter may use for one reply.
#[derive(Debug, Clone, Copy)]
pub struct DraftRequest<'a> {
    pub item: &'a Item,
    /// Successful and failed results, in plan order.
    pub tool_results: &'a [ToolResult],
    /// ISO 639-1 code the reply must be written in.
    pub language: &'a str,
    /// Learned style for the sender, if any.
    pub style: Option<&'a StyleHints>,
    /// HTML signature appended after drafting.
    pub signature: Option<&'a str>,
}

/// Drafting collaborator. Returns the reply body as plain text.
#[async_trait]
pub trait Drafter: Send + Sync {
    async fn compose(&self, request: DraftRequest<'_>) -> Result<String, DraftError>;
}
