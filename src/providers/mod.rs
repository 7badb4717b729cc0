//! Upstream chat-completion providers and the one place their response
//! shapes are folded into [`CompletionResult`].

pub mod anthropic;
pub mod together;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ChatRequest, CompletionResult, Usage};
use crate::{AstroError, Result};

pub use anthropic::ClaudeProvider;
pub use together::TogetherProvider;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 25_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Together,
    Claude,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Together => "together",
            Self::Claude => "claude",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Together => "https://api.together.xyz/v1",
            Self::Claude => "https://api.anthropic.com/v1",
        }
    }

    pub fn default_max_tokens_ceiling(self) -> u32 {
        match self {
            Self::Together => 8_192,
            Self::Claude => 4_096,
        }
    }

    pub fn api_key_env_keys(self) -> &'static [&'static str] {
        match self {
            Self::Together => &["TOGETHER_API_KEY"],
            Self::Claude => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
        }
    }
}

/// Per-provider knobs; unset fields fall back to the provider's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    /// Replaces the caller's model name when set.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub default_max_tokens: Option<u32>,
    #[serde(default)]
    pub max_tokens_ceiling: Option<u32>,
    /// Per-attempt HTTP timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProviderSettings {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn base_url(&self, kind: ProviderKind) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn max_tokens_ceiling(&self, kind: ProviderKind) -> u32 {
        self.max_tokens_ceiling
            .unwrap_or_else(|| kind.default_max_tokens_ceiling())
            .max(1)
    }

    /// Caller's `max_tokens` (or the default) capped at the ceiling.
    pub fn effective_max_tokens(&self, kind: ProviderKind, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .min(self.max_tokens_ceiling(kind))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder().timeout(self.timeout()).build()?)
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Budget for a single attempt, enforced by the router.
    fn attempt_timeout(&self) -> Option<Duration> {
        None
    }

    /// One upstream attempt; retries are the caller's business.
    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResult>;
}

/// Folds a raw provider response into the canonical result.
pub fn normalize(raw: &Value, kind: ProviderKind) -> Result<CompletionResult> {
    match kind {
        ProviderKind::Together => normalize_chat_completion(raw),
        ProviderKind::Claude => normalize_messages(raw),
    }
}

fn normalize_chat_completion(raw: &Value) -> Result<CompletionResult> {
    let choice = raw
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .ok_or_else(|| AstroError::InvalidResponse("chat completion has no choices".to_string()))?;
    let content = choice
        .get("message")
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .or_else(|| choice.get("text").and_then(Value::as_str))
        .ok_or_else(|| {
            AstroError::InvalidResponse("chat completion choice has no content".to_string())
        })?;
    let finish_reason = choice
        .get("finish_reason")
        .and_then(Value::as_str)
        .unwrap_or("stop");

    let usage = raw.get("usage");
    Ok(CompletionResult {
        content: content.to_string(),
        finish_reason: finish_reason.to_string(),
        usage: Usage {
            prompt_tokens: token_count(usage, "prompt_tokens"),
            completion_tokens: token_count(usage, "completion_tokens"),
        },
    })
}

fn normalize_messages(raw: &Value) -> Result<CompletionResult> {
    let blocks = raw
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AstroError::InvalidResponse("message has no content blocks".to_string()))?;
    let content = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("");

    let usage = raw.get("usage");
    Ok(CompletionResult {
        content,
        finish_reason: stop_reason_to_finish_reason(raw.get("stop_reason").and_then(Value::as_str))
            .to_string(),
        usage: Usage {
            prompt_tokens: token_count(usage, "input_tokens"),
            completion_tokens: token_count(usage, "output_tokens"),
        },
    })
}

fn stop_reason_to_finish_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some("refusal") => "content_filter",
        _ => "stop",
    }
}

fn token_count(usage: Option<&Value>, field: &str) -> u64 {
    usage
        .and_then(|usage| usage.get(field))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}
