use std::sync::Arc;

use tracing::{debug, warn};

use super::config::GatewayConfig;
use super::observability::Observability;
use super::redaction::SecretRedactor;
use super::retry::{Deadline, RetryOrchestrator};
use super::GatewayError;
use crate::providers::{ClaudeProvider, CompletionProvider, ProviderKind, TogetherProvider};
use crate::types::{ChatRequest, CompletionResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedCompletion {
    pub result: CompletionResult,
    pub provider: ProviderKind,
    /// The primary was configured but failed definitively.
    pub fell_back: bool,
}

/// Primary/fallback dispatch. Each provider runs under the retry
/// orchestrator; the fallback only sees requests the primary could not
/// serve at all.
#[derive(Clone)]
pub struct ProviderRouter {
    primary: Option<Arc<dyn CompletionProvider>>,
    fallback: Option<Arc<dyn CompletionProvider>>,
    redactor: SecretRedactor,
    observability: Option<Arc<Observability>>,
}

impl std::fmt::Debug for ProviderRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRouter")
            .field("primary", &self.primary.as_ref().map(|provider| provider.name()))
            .field("fallback", &self.fallback.as_ref().map(|provider| provider.name()))
            .finish()
    }
}

impl ProviderRouter {
    pub fn new(
        primary: Option<Arc<dyn CompletionProvider>>,
        fallback: Option<Arc<dyn CompletionProvider>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            redactor: SecretRedactor::default(),
            observability: None,
        }
    }

    /// Together as primary and Claude as fallback, each present only when
    /// its API key is configured.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let build_error = |err: crate::AstroError| GatewayError::Internal {
            message: format!("build provider client: {err}"),
        };

        let primary = match config.secrets.together_api_key.as_deref() {
            Some(key) => Some(Arc::new(
                TogetherProvider::new(key, config.primary.clone()).map_err(build_error)?,
            ) as Arc<dyn CompletionProvider>),
            None => None,
        };
        let fallback = match config.secrets.claude_api_key.as_deref() {
            Some(key) => Some(Arc::new(
                ClaudeProvider::new(key, config.fallback.clone()).map_err(build_error)?,
            ) as Arc<dyn CompletionProvider>),
            None => None,
        };

        Ok(Self::new(primary, fallback)
            .with_redactor(SecretRedactor::new(config.secrets.values())))
    }

    pub fn with_redactor(mut self, redactor: SecretRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn redactor(&self) -> &SecretRedactor {
        &self.redactor
    }

    pub async fn complete(
        &self,
        request: &ChatRequest,
        retry: &RetryOrchestrator,
        deadline: Deadline,
    ) -> Result<RoutedCompletion, GatewayError> {
        let Some(primary) = self.primary.as_ref() else {
            let Some(fallback) = self.fallback.as_ref() else {
                return Err(GatewayError::auth_config(
                    "no completion provider configured (set TOGETHER_API_KEY or ANTHROPIC_API_KEY)",
                ));
            };
            debug!(provider = fallback.name(), "primary key missing; using fallback directly");
            let result = self.run(fallback.as_ref(), request, retry, deadline).await?;
            return Ok(RoutedCompletion {
                result,
                provider: fallback.kind(),
                fell_back: false,
            });
        };

        let err = match self.run(primary.as_ref(), request, retry, deadline).await {
            Ok(result) => {
                return Ok(RoutedCompletion {
                    result,
                    provider: primary.kind(),
                    fell_back: false,
                });
            }
            Err(err) => err,
        };

        let fallback = match self.fallback.as_ref() {
            Some(fallback) if falls_back_on(&err) => fallback,
            _ => return Err(err),
        };

        warn!(
            primary = primary.name(),
            fallback = fallback.name(),
            error = %err,
            "primary provider failed; dispatching to fallback"
        );
        if let Some(observability) = self.observability.as_ref() {
            observability.record_fallback();
        }

        let result = self.run(fallback.as_ref(), request, retry, deadline).await?;
        Ok(RoutedCompletion {
            result,
            provider: fallback.kind(),
            fell_back: true,
        })
    }

    async fn run(
        &self,
        provider: &dyn CompletionProvider,
        request: &ChatRequest,
        retry: &RetryOrchestrator,
        deadline: Deadline,
    ) -> Result<CompletionResult, GatewayError> {
        retry
            .execute(deadline, |attempt| async move {
                debug!(provider = provider.name(), attempt, "calling completion provider");
                let call = provider.complete(request);
                let outcome = match provider.attempt_timeout() {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            return Err(GatewayError::UpstreamTimeout {
                                message: format!(
                                    "{} did not answer within {}ms",
                                    provider.name(),
                                    limit.as_millis()
                                ),
                            });
                        }
                    },
                    None => call.await,
                };
                outcome.map_err(|err| self.redactor.redact_error(GatewayError::from(err)))
            })
            .await
    }
}

/// Failures the fallback can plausibly fix. Bad input and an exhausted
/// request budget stay failures whichever provider answers.
fn falls_back_on(err: &GatewayError) -> bool {
    !matches!(
        err,
        GatewayError::Validation { .. } | GatewayError::DeadlineExceeded { .. }
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::retry::{NoJitter, RetryPolicy};
    use crate::types::Message;
    use crate::utils::test_support::{ScriptedProvider, Step};

    fn orchestrator(max_attempts: u32) -> RetryOrchestrator {
        RetryOrchestrator::new(RetryPolicy {
            max_attempts,
            base_delay_ms: 1_000,
            backoff_factor: 2.0,
            jitter_ms: 0,
        })
        .with_jitter(Arc::new(NoJitter))
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![Message::user("Tell me about Aries")])
    }

    #[tokio::test(start_paused = true)]
    async fn primary_success_never_touches_fallback() {
        let primary = Arc::new(ScriptedProvider::new(
            ProviderKind::Together,
            vec![Step::reply("from together", "stop", 400)],
        ));
        let fallback = Arc::new(ScriptedProvider::new(ProviderKind::Claude, vec![]));
        let router = ProviderRouter::new(Some(primary.clone()), Some(fallback.clone()));

        let routed = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .expect("routed");
        assert_eq!(routed.provider, ProviderKind::Together);
        assert!(!routed.fell_back);
        assert_eq!(routed.result.content, "from together");
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_primary_falls_back() {
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Together, vec![Step::Status(503)]));
        let fallback = Arc::new(ScriptedProvider::new(
            ProviderKind::Claude,
            vec![Step::reply("from claude", "stop", 500)],
        ));
        let observability = Arc::new(Observability::default());
        let router = ProviderRouter::new(Some(primary.clone()), Some(fallback.clone()))
            .with_observability(observability.clone());

        let routed = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .expect("routed");
        assert_eq!(primary.calls(), 3);
        assert_eq!(fallback.calls(), 1);
        assert!(routed.fell_back);
        assert_eq!(routed.provider, ProviderKind::Claude);
        assert_eq!(observability.snapshot().fallbacks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_primary_error_falls_back_without_retry() {
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Together, vec![Step::Status(401)]));
        let fallback = Arc::new(ScriptedProvider::new(
            ProviderKind::Claude,
            vec![Step::reply("from claude", "stop", 500)],
        ));
        let router = ProviderRouter::new(Some(primary.clone()), Some(fallback));

        let routed = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .expect("routed");
        assert_eq!(primary.calls(), 1);
        assert!(routed.fell_back);
    }

    #[tokio::test(start_paused = true)]
    async fn without_fallback_the_primary_error_surfaces() {
        let primary = Arc::new(ScriptedProvider::new(ProviderKind::Together, vec![Step::Status(500)]));
        let router = ProviderRouter::new(Some(primary.clone()), None);

        let err = router
            .complete(&request(), &orchestrator(2), Deadline::after(Duration::from_secs(55)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamServer { status: Some(500), .. }));
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_primary_key_uses_fallback_directly() {
        let fallback = Arc::new(ScriptedProvider::new(
            ProviderKind::Claude,
            vec![Step::reply("from claude", "stop", 500)],
        ));
        let router = ProviderRouter::new(None, Some(fallback));
        let routed = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .expect("routed");
        assert_eq!(routed.provider, ProviderKind::Claude);
        assert!(!routed.fell_back);
    }

    #[tokio::test]
    async fn no_provider_is_an_auth_config_error() {
        let router = ProviderRouter::new(None, None);
        let err = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AuthConfig { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempt_is_cut_off_as_timeout() {
        let primary = Arc::new(
            ScriptedProvider::new(
                ProviderKind::Together,
                vec![Step::Hang, Step::reply("late but fine", "stop", 400)],
            )
            .with_attempt_timeout(Duration::from_millis(100)),
        );
        let router = ProviderRouter::new(Some(primary.clone()), None);

        let started = tokio::time::Instant::now();
        let routed = router
            .complete(&request(), &orchestrator(3), Deadline::after(Duration::from_secs(55)))
            .await
            .expect("routed");
        assert_eq!(routed.result.content, "late but fine");
        assert_eq!(primary.calls(), 2);
        assert_eq!(started.elapsed(), Duration::from_millis(1_100));
    }
}
