use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::oauth::OAuthClientCredentials;
use crate::clock::Clock;
use crate::gateway::GatewayError;

/// Refresh this long before the provider-declared expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_millis(600_000);

#[derive(Clone, PartialEq, Eq)]
pub struct CachedToken {
    pub value: String,
    pub expires_at_epoch_ms: u64,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("value", &"<redacted>")
            .field("expires_at_epoch_ms", &self.expires_at_epoch_ms)
            .finish()
    }
}

impl CachedToken {
    pub fn is_valid(&self, now_epoch_ms: u64, safety_margin: Duration) -> bool {
        let margin = safety_margin.as_millis() as u64;
        now_epoch_ms < self.expires_at_epoch_ms.saturating_sub(margin)
    }
}

/// Single cached bearer token for the data provider.
///
/// The slot lock is held across the upstream refresh, so concurrent callers
/// that find the token stale queue behind one in-flight request and then
/// reuse its result. A failed refresh leaves the previous token in place.
pub struct TokenCache {
    credentials: OAuthClientCredentials,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("credentials", &self.credentials)
            .field("safety_margin", &self.safety_margin)
            .finish()
    }
}

impl TokenCache {
    pub fn new(
        credentials: OAuthClientCredentials,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            credentials,
            http,
            clock,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            slot: Mutex::new(None),
        }
    }

    pub fn with_safety_margin(mut self, safety_margin: Duration) -> Self {
        self.safety_margin = safety_margin;
        self
    }

    pub fn credentials(&self) -> &OAuthClientCredentials {
        &self.credentials
    }

    pub async fn get_token(&self) -> Result<String, GatewayError> {
        let mut slot = self.slot.lock().await;

        let now = self.clock.now_epoch_millis();
        if let Some(token) = slot.as_ref().filter(|token| token.is_valid(now, self.safety_margin)) {
            return Ok(token.value.clone());
        }

        debug!(had_token = slot.is_some(), "refreshing data provider token");
        let fetched = match self.credentials.fetch_token(&self.http).await {
            Ok(token) => token,
            Err(err) => {
                warn!(error = %err, "data provider token refresh failed");
                return Err(err);
            }
        };

        // Stamp expiry from when the response arrived, not when we asked.
        let now = self.clock.now_epoch_millis();
        let cached = CachedToken {
            value: fetched.access_token,
            expires_at_epoch_ms: now.saturating_add(fetched.expires_in.saturating_mul(1_000)),
        };
        info!(
            expires_at_epoch_ms = cached.expires_at_epoch_ms,
            "data provider token refreshed"
        );
        let value = cached.value.clone();
        *slot = Some(cached);
        Ok(value)
    }

    /// Drops the cached token if it is still `rejected`, e.g. after the
    /// provider answered 401 for it. A token another caller already
    /// refreshed is kept. Returns whether the slot was cleared.
    pub async fn invalidate(&self, rejected: &str) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|token| token.value == rejected) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub async fn cached(&self) -> Option<CachedToken> {
        self.slot.lock().await.clone()
    }
}
