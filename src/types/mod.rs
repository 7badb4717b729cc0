use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A chat completion request as accepted on `POST /chat`.
///
/// `messages` is non-empty once [`ChatRequest::validate`] has passed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Asks every provider for as many tokens as its ceiling allows.
    pub fn at_token_ceiling(mut self) -> Self {
        self.max_tokens = Some(u32::MAX);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("model is required".to_string());
        }
        if self.messages.is_empty() {
            return Err("messages must be a non-empty array".to_string());
        }
        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || temperature < 0.0 {
                return Err(format!("temperature must be a non-negative number, got {temperature}"));
            }
        }
        if self.max_tokens == Some(0) {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }

    /// Content of the last user message, or an empty string.
    pub fn last_user_content(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default()
    }

    /// All system and user text joined with blank lines, the text the
    /// prompt heuristics look at.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .filter(|message| message.role != Role::Assistant)
            .map(|message| message.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// Provider-independent completion, whichever upstream produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub content: String,
    pub finish_reason: String,
    pub usage: Usage,
}

impl CompletionResult {
    pub fn hit_token_limit(&self) -> bool {
        self.finish_reason.eq_ignore_ascii_case("length")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ChatCompletionMessage,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<Usage> for ChatCompletionUsage {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens(),
        }
    }
}

/// OpenAI-compatible `chat.completion` object returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: ChatCompletionUsage,
}

impl ChatCompletionResponse {
    pub fn from_result(
        id: impl Into<String>,
        created: u64,
        model: impl Into<String>,
        result: CompletionResult,
    ) -> Self {
        Self {
            id: id.into(),
            object: "chat.completion".to_string(),
            created,
            model: model.into(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionMessage {
                    role: Role::Assistant,
                    content: result.content,
                },
                finish_reason: result.finish_reason,
            }],
            usage: result.usage.into(),
        }
    }

    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_missing_model_and_empty_messages() {
        let missing_model = ChatRequest::new("  ", vec![Message::user("hi")]);
        assert!(missing_model.validate().unwrap_err().contains("model"));

        let empty = ChatRequest::new("m", Vec::new());
        assert!(empty.validate().unwrap_err().contains("messages"));

        let zero = ChatRequest::new("m", vec![Message::user("hi")]).with_max_tokens(0);
        assert!(zero.validate().is_err());

        assert!(ChatRequest::new("m", vec![Message::user("hi")]).validate().is_ok());
    }

    #[test]
    fn prompt_text_skips_assistant_turns() {
        let request = ChatRequest::new(
            "m",
            vec![
                Message::system("be brief"),
                Message::assistant("earlier answer"),
                Message::user("Tell me about Aries"),
            ],
        );
        assert_eq!(request.prompt_text(), "be brief\n\nTell me about Aries");
        assert_eq!(request.last_user_content(), "Tell me about Aries");
    }

    #[test]
    fn response_shape_is_openai_compatible() {
        let result = CompletionResult {
            content: "hello".to_string(),
            finish_reason: "stop".to_string(),
            usage: Usage {
                prompt_tokens: 3,
                completion_tokens: 4,
            },
        };
        let response = ChatCompletionResponse::from_result("chatcmpl-1", 10, "m", result);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["object"], "chat.completion");
        assert_eq!(value["choices"][0]["message"]["role"], "assistant");
        assert_eq!(value["choices"][0]["finish_reason"], "stop");
        assert_eq!(value["usage"]["total_tokens"], 7);
    }
}
