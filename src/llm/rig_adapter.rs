//! Bridges rig's `CompletionModel` to [`LlmProvider`].

use std::time::Duration;

use async_trait::async_trait;
use rig::OneOrMany;
use rig::completion::{AssistantContent, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};

pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
    timeout: Duration,
}

impl<M> RigAdapter<M> {
    pub fn new(model: M, model_name: &str, provider: &'static str, timeout: Duration) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
            timeout,
        }
    }

    fn failed(&self, reason: String) -> LlmError {
        LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason,
        }
    }
}

fn to_rig(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        Role::System | Role::User => Message::user(message.content.clone()),
    }
}

/// System messages become the preamble; the last remaining message is the prompt.
pub(crate) fn split_messages(
    messages: &[ChatMessage],
) -> (Option<String>, Vec<ChatMessage>, Option<ChatMessage>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let preamble = (!system.is_empty()).then(|| system.join("\n\n"));
    let mut rest: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    let prompt = rest.pop();
    (preamble, rest, prompt)
}

/// Concatenated text parts of a completion; tool calls and reasoning are ignored.
pub(crate) fn response_text(choice: &OneOrMany<AssistantContent>) -> String {
    choice
        .iter()
        .filter_map(|part| match part {
            AssistantContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, history, prompt) = split_messages(&request.messages);
        let Some(prompt) = prompt else {
            return Err(LlmError::InvalidResponse {
                provider: self.provider.to_string(),
                reason: "request has no user message".into(),
            });
        };

        let mut builder = self
            .model
            .completion_request(to_rig(&prompt))
            .messages(history.iter().map(to_rig).collect());
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(t) = request.temperature {
            builder = builder.temperature(f64::from(t));
        }
        if let Some(n) = request.max_tokens {
            builder = builder.max_tokens(u64::from(n));
        }

        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| self.failed(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| self.failed(e.to_string()))?;

        tracing::debug!(
            provider = self.provider,
            model = %self.model_name,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "Completion received"
        );
        Ok(CompletionResponse {
            content: response_text(&response.choice),
            input_tokens: u32::try_from(response.usage.input_tokens).unwrap_or(u32::MAX),
            output_tokens: u32::try_from(response.usage.output_tokens).unwrap_or(u32::MAX),
            finish_reason: FinishReason::Stop,
        })
    }
}
