use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{CompletionProvider, DEFAULT_TEMPERATURE, ProviderKind, ProviderSettings, normalize};
use crate::Result;
use crate::types::{ChatRequest, CompletionResult};

/// Together AI through its OpenAI-compatible `chat/completions` endpoint.
#[derive(Clone)]
pub struct TogetherProvider {
    http: reqwest::Client,
    api_key: String,
    settings: ProviderSettings,
}

impl std::fmt::Debug for TogetherProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TogetherProvider")
            .field("api_key", &"<redacted>")
            .field("settings", &self.settings)
            .finish()
    }
}

impl TogetherProvider {
    pub fn new(api_key: impl Into<String>, settings: ProviderSettings) -> Result<Self> {
        Ok(Self {
            http: settings.build_http_client()?,
            api_key: api_key.into(),
            settings,
        })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.settings.base_url(ProviderKind::Together);
        if base.ends_with("/chat/completions") {
            base
        } else {
            format!("{base}/chat/completions")
        }
    }

    fn request_body(&self, request: &ChatRequest) -> Value {
        let model = self
            .settings
            .model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(request.model.as_str());
        let messages = request
            .messages
            .iter()
            .map(|message| {
                serde_json::json!({
                    "role": message.role.as_str(),
                    "content": message.content,
                })
            })
            .collect::<Vec<_>>();

        serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": self
                .settings
                .effective_max_tokens(ProviderKind::Together, request.max_tokens),
            "temperature": request.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        })
    }
}

#[async_trait]
impl CompletionProvider for TogetherProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Together
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        Some(self.settings.timeout())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<CompletionResult> {
        let body = self.request_body(request);
        let raw = crate::utils::http::send_json::<Value>(
            self.http
                .post(self.chat_completions_url())
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;
        normalize(&raw, ProviderKind::Together)
    }
}
