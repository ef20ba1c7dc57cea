//! Tool trait and output type.

use std::time::Duration;

use async_trait::async_trait;

pub use crate::error::ToolError;
use crate::pipeline::types::Item;

/// Successful tool output.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Structured payload. A top-level `summary` string is shown to the drafter.
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }
}

/// A capability the pipeline can invoke while preparing a reply.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// What the tool is for and when it applies.
    fn description(&self) -> &str;

    /// JSON schema for `execute` parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Arguments for this item when the tool applies, `None` otherwise.
    ///
    /// Must be a pure function of the item.
    fn plan(&self, item: &Item) -> Option<serde_json::Value>;

    async fn execute(&self, params: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Required non-empty string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{name}' parameter")))
}

/// Optional integer parameter, clamped to `1..=max`.
pub fn optional_count(params: &serde_json::Value, name: &str, default: u64, max: u64) -> usize {
    params
        .get(name)
        .and_then(|v| v.as_u64())
        .unwrap_or(default)
        .clamp(1, max) as usize
}
