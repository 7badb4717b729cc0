use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{CompletionProvider, DEFAULT_TEMPERATURE, ProviderKind, ProviderSettings, normalize};
use crate::Result;
use crate::types::{ChatRequest, CompletionResult, Role};

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude through the Anthropic Messages API, used as the fallback.
#[derive(Clone)]
pub struct ClaudeProvider {
    http: reqwest::Client,
    api_key: String,
    version: String,
    settings: ProviderSettings,
}

impl std::fmt::Debug for ClaudeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeProvider")
            .field("api_key", &"<redacted>")
            .field("version", &self.version)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ClaudeProvider {
    pub fn new(api_key: impl Into<String>, settings: ProviderSettings) -> Result<Self> {
        Ok(Self {
            http: settings.build_http_client()?,
            api_key: api_key.into(),
            version: ANTHROPIC_VERSION.to_string(),
            settings,
        })
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    fn messages_url(&self) -> String {
        let base = self.settings.base_url(ProviderKind::Claude);
        if base.ends_with("/messages") {
            base
        } else {
            format!("{base}/messages")
        }
    }

    /// The caller's model names a primary-provider model, so Claude always
    /// runs its own (configured or default) model.
    fn model(&self) -> &str {
        self.settings
            .model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL)
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let mut system = Vec::<&str>::new();
        let mut messages = Vec::<Value>::new();
        for message in &request.messages {
            match message.role {
                Role::System => system.push(message.content.as_str()),
                Role::User | Role::Assistant => messages.push(serde_json::json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                })),
            }
        }

        let mut body = Map::<String, Value>::new();
        body.insert("model".to_string(), Value::String(self.model().to_string()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert(
            "max_tokens".to_string(),
            Value::Number(
                self.settings
                    .effective_max_tokens(ProviderKind::Claude, request.max_tokens)
                    .into(),
            ),
        );
        // Messages API temperatures live in [0, 1].
        let temperature = request.temperature.unwrap_or(DEFAULT_TEMPERATURE).clamp(0.0, 1.0);
        body.insert(
            "temperature".to_string(),
            Value::Number(
                serde_json::Number::from_f64(f64::from(temperature)).unwrap_or_else(|| 0.into()),
            ),
        );
        if !system.is_empty() {
            body.insert("system".to_string(), Value::String(system.join("\n\n")));
        }
        Value::Object(body)
    }
}

#[async_trait]
impl CompletionProvider for ClaudeProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        Some(self.settings.timeout())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResult> {
        let body = self.request_body(request);
        let raw = crate::utils::http::send_json::<Value>(
            self.http
                .post(self.messages_url())
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.version)
                .json(&body),
        )
        .await?;
        normalize(&raw, ProviderKind::Claude)
    }
}
