//! LLM integration used for reply drafting.
//!
//! Supports:
//! - **OpenAI** (and compatible endpoints): `/chat/completions`
//! - **Anthropic**: `/messages`
//!
//! The vendors' own endpoints go through rig-core, bridged by [`RigAdapter`].
//! A custom `LLM_BASE_URL` (proxies, self-hosted OpenAI-compatible servers)
//! goes through [`HttpProvider`] instead.

pub mod http;
pub mod provider;
mod rig_adapter;

pub use http::HttpProvider;
pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;
use std::time::Duration;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::config::parse_number;
use crate::error::{ConfigError, LlmError};

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

impl LlmBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
        }
    }

    fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-3-5-sonnet-latest",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout: Duration,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match get("LLM_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("openai") => LlmBackend::OpenAi,
            Some("anthropic") => LlmBackend::Anthropic,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "LLM_BACKEND".into(),
                    message: format!("expected 'openai' or 'anthropic', got {other:?}"),
                });
            }
        };

        let api_key = get("LLM_API_KEY")
            .or_else(|| get(backend.key_var()))
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "LLM_API_KEY".into(),
                hint: format!("Set LLM_API_KEY or {}.", backend.key_var()),
            })?;

        let temperature: f32 = match get("LLM_TEMPERATURE") {
            Some(raw) => parse_number("LLM_TEMPERATURE", &raw)?,
            None => 0.7,
        };
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue {
                key: "LLM_TEMPERATURE".into(),
                message: format!("{temperature} is outside 0.0..=2.0"),
            });
        }

        Ok(Self {
            backend,
            api_key,
            model: get("LLM_MODEL").unwrap_or_else(|| backend.default_model().into()),
            base_url: get("LLM_BASE_URL").unwrap_or_else(|| backend.default_base_url().into()),
            temperature,
            max_tokens: match get("LLM_MAX_TOKENS") {
                Some(raw) => parse_number("LLM_MAX_TOKENS", &raw)?,
                None => 1000,
            },
            request_timeout: match get("LLM_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(parse_number("LLM_TIMEOUT_SECS", &raw)?),
                None => Duration::from_secs(60),
            },
        })
    }
}

impl LlmConfig {
    /// True when the configured endpoint is the vendor's own.
    pub fn uses_default_endpoint(&self) -> bool {
        self.base_url.trim_end_matches('/') == self.backend.default_base_url()
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    if !config.uses_default_endpoint() {
        tracing::info!(
            "Using {} at {} (model: {})",
            config.backend.as_str(),
            config.base_url,
            config.model
        );
        return Ok(Arc::new(HttpProvider::new(config)?));
    }
    match config.backend {
        LlmBackend::Anthropic => create_anthropic_provider(config),
        LlmBackend::OpenAi => create_openai_provider(config),
    }
}

fn create_anthropic_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::anthropic;

    let client: rig::client::Client<anthropic::client::AnthropicExt> =
        anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("Failed to create Anthropic client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(
        model,
        &config.model,
        "anthropic",
        config.request_timeout,
    )))
}

fn create_openai_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: rig::client::Client<openai::client::OpenAIResponsesExt> =
        openai::Client::new(config.api_key.expose_secret()).map_err(|e| {
            LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("Failed to create OpenAI client: {e}"),
            }
        })?;

    let model = client.completion_model(&config.model);
    tracing::info!("Using OpenAI (model: {})", config.model);
    Ok(Arc::new(RigAdapter::new(
        model,
        &config.model,
        "openai",
        config.request_timeout,
    )))
}
