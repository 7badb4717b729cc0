use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, info, info_span, warn};

use super::config::GatewayConfig;
use super::observability::Observability;
use super::retry::{Deadline, JitterSource, RetryOrchestrator};
use super::router::{ProviderRouter, RoutedCompletion};
use super::GatewayError;
use crate::clock::{Clock, SystemClock};
use crate::prompt::{
    BirthDetailExtractor, PromptNormalizer, RequestKind, TruncationDetector, classify, reprompt,
};
use crate::providers::ProviderKind;
use crate::types::{ChatCompletionResponse, ChatRequest, Role};

/// States a chat request moves through, in order of visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStage {
    Validating,
    Normalizing,
    AttemptingPrimary,
    TruncatedRetry,
    Success,
    HardFailure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub response: ChatCompletionResponse,
    pub provider: ProviderKind,
    pub kind: RequestKind,
    pub reprompted: bool,
    pub stages: Vec<GatewayStage>,
}

/// Entry point for completion requests.
///
/// Validates, normalizes astrology prompts, routes through the providers
/// under the retry policy and, when the first answer looks truncated,
/// spends exactly one reprompt at the token ceiling.
pub struct ChatGateway {
    router: ProviderRouter,
    retry: RetryOrchestrator,
    reprompt_retry: RetryOrchestrator,
    normalizer: PromptNormalizer,
    extractor: BirthDetailExtractor,
    detector: TruncationDetector,
    clock: Arc<dyn Clock>,
    observability: Arc<Observability>,
    request_deadline: Duration,
}

impl std::fmt::Debug for ChatGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatGateway")
            .field("router", &self.router)
            .field("retry", &self.retry)
            .field("reprompt_retry", &self.reprompt_retry)
            .field("request_deadline", &self.request_deadline)
            .finish()
    }
}

impl ChatGateway {
    pub fn new(router: ProviderRouter, config: &GatewayConfig) -> Self {
        let observability = Arc::new(Observability::default());
        Self {
            router: router.with_observability(observability.clone()),
            retry: RetryOrchestrator::new(config.retry.clone())
                .with_observability(observability.clone()),
            reprompt_retry: RetryOrchestrator::new(config.reprompt_retry.clone())
                .with_observability(observability.clone()),
            normalizer: PromptNormalizer::new(),
            extractor: BirthDetailExtractor::new(),
            detector: TruncationDetector::new(config.truncation.clone()),
            clock: Arc::new(SystemClock),
            observability,
            request_deadline: config.request_deadline(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Ok(Self::new(ProviderRouter::from_config(config)?, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.retry = self.retry.with_jitter(jitter.clone());
        self.reprompt_retry = self.reprompt_retry.with_jitter(jitter);
        self
    }

    /// Shares counters with other components (the HTTP layer, the data
    /// client) instead of keeping a private set.
    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.router = self.router.with_observability(observability.clone());
        self.retry = self.retry.with_observability(observability.clone());
        self.reprompt_retry = self.reprompt_retry.with_observability(observability.clone());
        self.observability = observability;
        self
    }

    pub fn observability(&self) -> &Arc<Observability> {
        &self.observability
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Whether the primary provider's key is configured.
    pub fn api_key_available(&self) -> bool {
        self.router.has_primary()
    }

    pub fn request_deadline(&self) -> Duration {
        self.request_deadline
    }

    pub async fn handle(
        &self,
        request: ChatRequest,
        request_id: &str,
    ) -> Result<ChatOutcome, GatewayError> {
        let deadline = Deadline::after(self.request_deadline);
        self.handle_with_deadline(request, request_id, deadline).await
    }

    pub async fn handle_with_deadline(
        &self,
        request: ChatRequest,
        request_id: &str,
        deadline: Deadline,
    ) -> Result<ChatOutcome, GatewayError> {
        let span = info_span!(
            "chat",
            request_id = %request_id,
            model = %request.model,
            kind = tracing::field::Empty,
        );
        self.observability.record_request();

        let mut stages = Vec::with_capacity(6);
        let outcome = self
            .run(request, request_id, deadline, &mut stages)
            .instrument(span)
            .await;
        if let Err(err) = &outcome {
            stages.push(GatewayStage::HardFailure);
            match err {
                GatewayError::Validation { .. } => self.observability.record_validation_failure(),
                _ => self.observability.record_error(),
            }
            warn!(request_id, code = err.code(), error = %err, "chat request failed");
        }
        outcome.map(|mut outcome| {
            outcome.stages = stages;
            outcome
        })
    }

    async fn run(
        &self,
        mut request: ChatRequest,
        request_id: &str,
        deadline: Deadline,
        stages: &mut Vec<GatewayStage>,
    ) -> Result<ChatOutcome, GatewayError> {
        stages.push(GatewayStage::Validating);
        request.validate().map_err(GatewayError::validation)?;

        let kind = classify(&request.messages);
        tracing::Span::current().record("kind", kind.as_str());
        if kind.normalizes_prompt() {
            stages.push(GatewayStage::Normalizing);
            self.normalize_messages(&mut request);
        }

        stages.push(GatewayStage::AttemptingPrimary);
        let first = self.router.complete(&request, &self.retry, deadline).await?;
        info!(
            provider = first.provider.as_str(),
            fell_back = first.fell_back,
            finish_reason = %first.result.finish_reason,
            completion_tokens = first.result.usage.completion_tokens,
            "completion received"
        );

        let prompt_text = request.prompt_text();
        let signal = self
            .detector
            .assess(&first.result, Some(&prompt_text), kind);

        let (routed, reprompted) = match signal {
            None => (first, false),
            Some(signal) => {
                stages.push(GatewayStage::TruncatedRetry);
                self.observability.record_truncation_reprompt();
                info!(signal = signal.as_str(), "completion looks truncated; reprompting");

                let details = self.extractor.extract(&prompt_text);
                debug!(
                    has_name = !details.name.is_empty(),
                    has_date = !details.date.is_empty(),
                    has_time = !details.time.is_empty(),
                    has_place = !details.place.is_empty(),
                    "birth details for reprompt"
                );
                let retry_request = reprompt(kind, &details, &request);
                match self
                    .router
                    .complete(&retry_request, &self.reprompt_retry, deadline)
                    .await
                {
                    Ok(second) => (longer(first, second), true),
                    Err(err) => {
                        warn!(error = %err, "reprompt failed; returning first completion");
                        (first, true)
                    }
                }
            }
        };

        stages.push(GatewayStage::Success);
        let response = ChatCompletionResponse::from_result(
            format!("chatcmpl-{request_id}"),
            self.clock.now_epoch_seconds(),
            request.model.clone(),
            routed.result,
        );
        Ok(ChatOutcome {
            response,
            provider: routed.provider,
            kind,
            reprompted,
            stages: Vec::new(),
        })
    }

    fn normalize_messages(&self, request: &mut ChatRequest) {
        let mut changed = 0usize;
        for message in request
            .messages
            .iter_mut()
            .filter(|message| message.role != Role::Assistant)
        {
            let normalized = self.normalizer.normalize(&message.content);
            if normalized != message.content.as_str() {
                message.content = normalized.into_owned();
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(messages = changed, "normalized planetary position text");
        }
    }
}

fn longer(first: RoutedCompletion, second: RoutedCompletion) -> RoutedCompletion {
    if second.result.content.chars().count() >= first.result.content.chars().count() {
        second
    } else {
        first
    }
}
