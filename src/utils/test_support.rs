pub fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

/// Body of an OpenAI-compatible `chat.completion` response, as Together
/// returns it.
pub fn together_completion_body(
    content: &str,
    finish_reason: &str,
    completion_tokens: u64,
) -> serde_json::Value {
    serde_json::json!({
        "id": "cmpl-upstream",
        "object": "chat.completion",
        "model": "upstream-model",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": 12,
            "completion_tokens": completion_tokens,
            "total_tokens": 12 + completion_tokens,
        },
    })
}

/// Body of an Anthropic Messages API response.
pub fn claude_message_body(content: &str, stop_reason: &str, output_tokens: u64) -> serde_json::Value {
    serde_json::json!({
        "id": "msg_upstream",
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "text", "text": content }],
        "stop_reason": stop_reason,
        "usage": { "input_tokens": 9, "output_tokens": output_tokens },
    })
}

/// A multi-section reading long enough to pass every truncation heuristic.
pub fn complete_reading(min_chars: usize) -> String {
    let sections = [
        "Overview",
        "Personality",
        "Key Strengths",
        "Potential Challenges",
        "Career",
        "Relationships",
    ];
    let mut out = String::new();
    let mut round = 0;
    while out.len() < min_chars {
        for section in sections {
            out.push_str(&format!("## {section}\n"));
            out.push_str(
                "The placements describe a steady temperament with a strong drive \
                 for learning, patient effort and generous communication with others.\n\n",
            );
        }
        round += 1;
        if round > 64 {
            break;
        }
    }
    out
}

/// One scripted upstream behaviour for [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum Step {
    Reply(crate::types::CompletionResult),
    /// Upstream answered with this HTTP status.
    Status(u16),
    /// Never answers; the attempt timeout has to cut it off.
    Hang,
}

impl Step {
    pub fn reply(content: &str, finish_reason: &str, completion_tokens: u64) -> Self {
        Self::Reply(crate::types::CompletionResult {
            content: content.to_string(),
            finish_reason: finish_reason.to_string(),
            usage: crate::types::Usage {
                prompt_tokens: 12,
                completion_tokens,
            },
        })
    }
}

/// In-memory [`crate::providers::CompletionProvider`] that replays a script
/// and records every request it saw. The last step repeats once the script
/// runs out.
pub struct ScriptedProvider {
    kind: crate::providers::ProviderKind,
    attempt_timeout: Option<std::time::Duration>,
    steps: std::sync::Mutex<std::collections::VecDeque<Step>>,
    last: std::sync::Mutex<Option<Step>>,
    requests: std::sync::Mutex<Vec<crate::types::ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(kind: crate::providers::ProviderKind, steps: Vec<Step>) -> Self {
        Self {
            kind,
            attempt_timeout: None,
            steps: std::sync::Mutex::new(steps.into()),
            last: std::sync::Mutex::new(None),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<crate::types::ChatRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    fn next_step(&self) -> Option<Step> {
        let mut steps = self.steps.lock().ok()?;
        let mut last = self.last.lock().ok()?;
        match steps.pop_front() {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => last.clone(),
        }
    }
}

#[async_trait::async_trait]
impl crate::providers::CompletionProvider for ScriptedProvider {
    fn kind(&self) -> crate::providers::ProviderKind {
        self.kind
    }

    fn attempt_timeout(&self) -> Option<std::time::Duration> {
        self.attempt_timeout
    }

    async fn complete(
        &self,
        request: &crate::types::ChatRequest,
    ) -> crate::Result<crate::types::CompletionResult> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        match self.next_step() {
            Some(Step::Reply(result)) => Ok(result),
            Some(Step::Status(code)) => Err(crate::AstroError::Api {
                status: reqwest::StatusCode::from_u16(code)
                    .unwrap_or(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
                body: format!("scripted status {code}"),
            }),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(crate::AstroError::InvalidResponse(
                "scripted provider has no steps".to_string(),
            )),
        }
    }
}
