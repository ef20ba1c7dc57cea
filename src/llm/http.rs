//! Chat completions over HTTP for OpenAI-compatible and Anthropic endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
};
use crate::llm::{LlmBackend, LlmConfig};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct HttpProvider {
    http: reqwest::Client,
    backend: LlmBackend,
    api_key: SecretString,
    model: String,
    endpoint: String,
}

impl HttpProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: config.backend.as_str().to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;
        let base = config.base_url.trim_end_matches('/');
        let endpoint = match config.backend {
            LlmBackend::OpenAi => format!("{base}/chat/completions"),
            LlmBackend::Anthropic => format!("{base}/messages"),
        };
        Ok(Self {
            http,
            backend: config.backend,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint,
        })
    }

    fn provider(&self) -> String {
        self.backend.as_str().to_string()
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let key = self.api_key.expose_secret();
        let builder = self.http.post(&self.endpoint);
        let builder = match self.backend {
            LlmBackend::OpenAi => builder
                .bearer_auth(key)
                .json(&openai_body(&self.model, &request)),
            LlmBackend::Anthropic => builder
                .header("x-api-key", key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&anthropic_body(&self.model, &request)),
        };

        let response = builder.send().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: self.provider(),
            reason: e.to_string(),
        })?;

        if let Some(err) = status_error(&self.provider(), status, retry_after, &body) {
            return Err(err);
        }

        let json: Value = serde_json::from_str(&body)?;
        let parsed = match self.backend {
            LlmBackend::OpenAi => parse_openai(&json),
            LlmBackend::Anthropic => parse_anthropic(&json),
        };
        let response = parsed.ok_or_else(|| LlmError::InvalidResponse {
            provider: self.provider(),
            reason: "no completion content".into(),
        })?;
        debug!(
            model = %self.model,
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Completion received"
        );
        Ok(response)
    }
}

fn status_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Option<LlmError> {
    if status.is_success() {
        return None;
    }
    let provider = provider.to_string();
    Some(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed { provider },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider,
            retry_after,
        },
        s if s.is_server_error() => LlmError::RequestFailed {
            provider,
            reason: format!("HTTP {s}"),
        },
        s => LlmError::InvalidResponse {
            provider,
            reason: format!("HTTP {s}: {}", body.chars().take(200).collect::<String>()),
        },
    })
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

pub(crate) fn openai_body(model: &str, request: &CompletionRequest) -> Value {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(|m| json!({"role": role_name(m.role), "content": m.content}))
        .collect();
    let mut body = json!({"model": model, "messages": messages});
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(n) = request.max_tokens {
        body["max_tokens"] = json!(n);
    }
    body
}

/// System messages move to the top-level `system` field.
pub(crate) fn anthropic_body(model: &str, request: &CompletionRequest) -> Value {
    let (system, rest): (Vec<&ChatMessage>, Vec<&ChatMessage>) = request
        .messages
        .iter()
        .partition(|m| m.role == Role::System);
    let messages: Vec<Value> = rest
        .iter()
        .map(|m| json!({"role": role_name(m.role), "content": m.content}))
        .collect();
    let mut body = json!({
        "model": model,
        "max_tokens": request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system.is_empty() {
        let joined: Vec<&str> = system.iter().map(|m| m.content.as_str()).collect();
        body["system"] = json!(joined.join("\n\n"));
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    body
}

fn usage(json: &Value, input: &str, output: &str) -> (u32, u32) {
    let get = |key: &str| {
        json.get("usage")
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    };
    (get(input), get(output))
}

pub(crate) fn parse_openai(json: &Value) -> Option<CompletionResponse> {
    let choice = json.get("choices")?.get(0)?;
    let content = choice.get("message")?.get("content")?.as_str()?.to_string();
    let finish_reason = match choice.get("finish_reason").and_then(|v| v.as_str()) {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        _ => FinishReason::Other,
    };
    let (input_tokens, output_tokens) = usage(json, "prompt_tokens", "completion_tokens");
    Some(CompletionResponse {
        content,
        input_tokens,
        output_tokens,
        finish_reason,
    })
}

pub(crate) fn parse_anthropic(json: &Value) -> Option<CompletionResponse> {
    let blocks = json.get("content")?.as_array()?;
    let content = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    let finish_reason = match json.get("stop_reason").and_then(|v| v.as_str()) {
        Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
        Some("max_tokens") => FinishReason::Length,
        _ => FinishReason::Other,
    };
    let (input_tokens, output_tokens) = usage(json, "input_tokens", "output_tokens");
    Some(CompletionResponse {
        content,
        input_tokens,
        output_tokens,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![
            ChatMessage::system("You draft replies."),
            ChatMessage::user("Hello"),
        ])
        .with_temperature(0.7)
        .with_max_tokens(500)
    }

    #[test]
    fn openai_body_keeps_system_inline() {
        let body = openai_body("gpt-4o-mini", &request());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hello");
        assert_eq!(body["max_tokens"], 500);
    }

    #[test]
    fn anthropic_body_lifts_system() {
        let body = anthropic_body("claude", &request());
        assert_eq!(body["system"], "You draft replies.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn parses_both_response_shapes() {
        let openai = json!({
            "choices": [{"message": {"content": "Hi there"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        });
        let r = parse_openai(&openai).unwrap();
        assert_eq!(r.content, "Hi there");
        assert_eq!(r.finish_reason, FinishReason::Stop);
        assert_eq!((r.input_tokens, r.output_tokens), (10, 3));

        let anthropic = json!({
            "content": [{"type": "text", "text": "Hi"}, {"type": "text", "text": "there"}],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 4, "output_tokens": 2}
        });
        let r = parse_anthropic(&anthropic).unwrap();
        assert_eq!(r.content, "Hi\nthere");
        assert_eq!(r.finish_reason, FinishReason::Length);

        assert!(parse_openai(&json!({"choices": []})).is_none());
    }

    #[test]
    fn status_mapping() {
        assert!(status_error("openai", StatusCode::OK, None, "").is_none());
        assert!(matches!(
            status_error("openai", StatusCode::UNAUTHORIZED, None, ""),
            Some(LlmError::AuthFailed { .. })
        ));
        let limited = status_error(
            "openai",
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(2)),
            "",
        )
        .unwrap();
        assert!(limited.is_transient());
        let bad = status_error("openai", StatusCode::BAD_REQUEST, None, "bad model").unwrap();
        assert!(!bad.is_transient());
        assert!(status_error("openai", StatusCode::BAD_GATEWAY, None, "")
            .unwrap()
            .is_transient());
    }
}
