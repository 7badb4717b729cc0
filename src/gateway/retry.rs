use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::GatewayError;
use super::observability::Observability;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryPolicy {
    /// Policy for the single truncation-triggered reprompt.
    pub fn reprompt() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 500,
            backoff_factor: 2.0,
            jitter_ms: 100,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry max_attempts must be >= 1".to_string());
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(format!(
                "retry backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            ));
        }
        Ok(())
    }

    /// `base_delay_ms * backoff_factor^(attempt - 1)`, without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        // Saturate rather than overflow for absurd attempt counts.
        let millis = if millis.is_finite() {
            millis.min(u64::MAX as f64 / 2.0)
        } else {
            u64::MAX as f64 / 2.0
        };
        Duration::from_millis(millis as u64)
    }

    /// Sleep taken after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32, jitter: &dyn JitterSource) -> Duration {
        let jitter_ms = jitter.jitter_ms(self.jitter_ms).min(self.jitter_ms);
        self.base_delay(attempt)
            .saturating_add(Duration::from_millis(jitter_ms))
    }
}

/// Uniform random extra delay in `0..=max_ms`.
pub trait JitterSource: Send + Sync {
    fn jitter_ms(&self, max_ms: u64) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn jitter_ms(&self, max_ms: u64) -> u64 {
        if max_ms == 0 {
            return 0;
        }
        let mut bytes = [0u8; 8];
        if getrandom::fill(&mut bytes).is_err() {
            return 0;
        }
        u64::from_le_bytes(bytes) % (max_ms.saturating_add(1))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn jitter_ms(&self, _max_ms: u64) -> u64 {
        0
    }
}

/// Absolute point in time after which no upstream work may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn at(at: Instant) -> Self {
        Self { at }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Runs an upstream operation under a [`RetryPolicy`], never starting an
/// attempt past the caller's [`Deadline`].
#[derive(Clone)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    jitter: Arc<dyn JitterSource>,
    observability: Option<Arc<Observability>>,
}

impl std::fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("policy", &self.policy)
            .finish()
    }
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            jitter: Arc::new(RandomJitter),
            observability: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.observability = Some(observability);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `op(attempt)` until it succeeds, fails with a non-retryable
    /// error, or `max_attempts` is used up. The last error is returned as is.
    pub async fn execute<T, F, Fut>(&self, deadline: Deadline, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            if deadline.is_expired() {
                return Err(GatewayError::DeadlineExceeded {
                    detail: format!("no time left to start attempt {attempt}"),
                });
            }

            let outcome = match tokio::time::timeout_at(deadline.instant(), op(attempt)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(GatewayError::DeadlineExceeded {
                        detail: format!("attempt {attempt} still running at the request deadline"),
                    });
                }
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.policy.delay(attempt, self.jitter.as_ref());
            let remaining = deadline.remaining();
            if delay >= remaining {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    remaining_ms = remaining.as_millis() as u64,
                    error = %err,
                    "next retry would start after the request deadline"
                );
                return Err(GatewayError::DeadlineExceeded {
                    detail: format!(
                        "retry {} would start after the deadline (backoff {}ms, {}ms left); last error: {err}",
                        attempt + 1,
                        delay.as_millis(),
                        remaining.as_millis()
                    ),
                });
            }

            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "upstream call failed; backing off"
            );
            if let Some(observability) = self.observability.as_ref() {
                observability.record_upstream_retry();
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
