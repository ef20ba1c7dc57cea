//! Single-retry policy for collaborator calls.
//!
//! A transient failure (rate limit, 5xx, dropped connection, drafting outage)
//! is retried exactly once after a fixed backoff. Anything else, or a second
//! failure, is returned to the caller unchanged.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{DraftError, LlmError, MailboxError, ToolError};

/// Default wait between the first failure and the retry.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Errors that can say whether a retry may help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for MailboxError {
    fn is_transient(&self) -> bool {
        MailboxError::is_transient(self)
    }
}

impl Transient for LlmError {
    fn is_transient(&self) -> bool {
        LlmError::is_transient(self)
    }
}

impl Transient for DraftError {
    fn is_transient(&self) -> bool {
        DraftError::is_transient(self)
    }
}

impl Transient for ToolError {
    fn is_transient(&self) -> bool {
        ToolError::is_transient(self)
    }
}

/// Fixed-backoff, one-retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Run `call`, retrying once if the first error is transient.
    pub async fn run<T, E, F, Fut>(&self, op: &str, mut call: F) -> Result<T, E>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match call().await {
            Ok(value) => Ok(value),
            Err(e) if e.is_transient() => {
                warn!(
                    op,
                    error = %e,
                    backoff_ms = self.backoff.as_millis() as u64,
                    "Transient failure, retrying once"
                );
                tokio::time::sleep(self.backoff).await;
                call().await
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BACKOFF)
    }
}
