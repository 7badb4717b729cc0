//! Client for the OAuth-protected astrology data provider.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::{OAuthClientCredentials, TokenCache};
use crate::clock::Clock;
use crate::gateway::{
    Deadline, GatewayConfig, GatewayError, JitterSource, Observability, RateLimiter,
    RetryOrchestrator,
};
use crate::gateway::redaction::SecretRedactor;
use crate::geocode::PlaceResolver;
use crate::{AstroError, Result};

/// Every data call: admission through the shared rate limiter, a bearer
/// token from the shared cache, then the request itself, all under the
/// retry policy and the caller's deadline.
pub struct AstrologyDataClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenCache>,
    limiter: Arc<RateLimiter>,
    retry: RetryOrchestrator,
    geocoder: Option<Arc<dyn PlaceResolver>>,
    redactor: SecretRedactor,
    observability: Option<Arc<Observability>>,
}

impl std::fmt::Debug for AstrologyDataClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstrologyDataClient")
            .field("base_url", &self.base_url)
            .field("tokens", &self.tokens)
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .finish()
    }
}

impl AstrologyDataClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        tokens: Arc<TokenCache>,
        limiter: Arc<RateLimiter>,
        retry: RetryOrchestrator,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            tokens,
            limiter,
            retry,
            geocoder: None,
            redactor: SecretRedactor::default(),
            observability: None,
        })
    }

    /// Wires the process-wide token cache and rate limiter from config.
    /// Fails with `AuthConfig` when the client credentials are missing or
    /// malformed.
    pub fn from_config(config: &GatewayConfig, clock: Arc<dyn Clock>) -> std::result::Result<Self, GatewayError> {
        let credentials = OAuthClientCredentials::new(
            config.oauth.token_url.as_str(),
            config.secrets.oauth_client_id.clone().unwrap_or_default(),
            config.secrets.oauth_client_secret.clone().unwrap_or_default(),
        )?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.data_api.timeout_ms))
            .build()
            .map_err(|err| GatewayError::Internal {
                message: format!("build data provider client: {err}"),
            })?;
        let tokens = TokenCache::new(credentials, http, clock.clone())
            .with_safety_margin(Duration::from_millis(config.oauth.safety_margin_ms));
        let limiter = RateLimiter::new(config.rate_limit.clone(), clock);

        let client = Self::new(
            config.data_api.base_url.as_str(),
            Duration::from_millis(config.data_api.timeout_ms),
            Arc::new(tokens),
            Arc::new(limiter),
            RetryOrchestrator::new(config.retry.clone()),
        )
        .map_err(GatewayError::from)?;
        Ok(client.with_redactor(SecretRedactor::new(config.secrets.values())))
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn PlaceResolver>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_redactor(mut self, redactor: SecretRedactor) -> Self {
        self.redactor = redactor;
        self
    }

    pub fn with_observability(mut self, observability: Arc<Observability>) -> Self {
        self.retry = self.retry.with_observability(observability.clone());
        self.observability = Some(observability);
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.retry = self.retry.with_jitter(jitter);
        self
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// `GET {base}/{endpoint}?{query}`. A `place` parameter without
    /// `coordinates` is geocoded and sent as `coordinates=lat,lon`.
    pub async fn get(
        &self,
        endpoint: &str,
        query: &[(String, String)],
        deadline: Deadline,
    ) -> std::result::Result<Value, GatewayError> {
        let endpoint = endpoint.trim().trim_matches('/');
        if !endpoint_regex().is_match(endpoint) {
            return Err(GatewayError::validation(format!(
                "invalid data endpoint {endpoint:?}"
            )));
        }
        let query = self.resolve_place(query).await?;
        let url = format!("{}/{endpoint}", self.base_url);

        self.retry
            .execute(deadline, |attempt| {
                let url = url.as_str();
                let query = query.as_slice();
                async move {
                    debug!(endpoint, attempt, "calling data provider");
                    self.attempt(url, query)
                        .await
                        .map_err(|err| self.redactor.redact_error(err))
                }
            })
            .await
    }

    async fn attempt(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> std::result::Result<Value, GatewayError> {
        if let Err(err) = self.limiter.acquire() {
            if let Some(observability) = self.observability.as_ref() {
                observability.record_rate_limited();
            }
            return Err(err);
        }

        let token = self.tokens.get_token().await?;
        match self.send(url, query, &token).await {
            Err(AstroError::Api { status, .. }) if status == reqwest::StatusCode::UNAUTHORIZED => {
                info!("data provider rejected cached token; refreshing");
                self.tokens.invalidate(&token).await;
                let token = self.tokens.get_token().await?;
                Ok(self.send(url, query, &token).await?)
            }
            other => Ok(other?),
        }
    }

    async fn send(&self, url: &str, query: &[(String, String)], token: &str) -> Result<Value> {
        crate::utils::http::send_json::<Value>(
            self.http.get(url).bearer_auth(token).query(query),
        )
        .await
    }

    async fn resolve_place(
        &self,
        query: &[(String, String)],
    ) -> std::result::Result<Vec<(String, String)>, GatewayError> {
        let has_coordinates = query.iter().any(|(key, _)| key == "coordinates");
        let place = query
            .iter()
            .find(|(key, _)| key == "place")
            .map(|(_, value)| value.as_str());

        let (Some(place), false) = (place, has_coordinates) else {
            return Ok(query.to_vec());
        };
        let Some(geocoder) = self.geocoder.as_ref() else {
            warn!("place given without coordinates but no geocoder is configured");
            return Err(GatewayError::validation(
                "coordinates are required (no geocoder configured)",
            ));
        };

        let coordinates = geocoder.resolve(place).await?;
        let mut out: Vec<(String, String)> = query
            .iter()
            .filter(|(key, _)| key != "place")
            .cloned()
            .collect();
        out.push(("coordinates".to_string(), coordinates.to_query_value()));
        Ok(out)
    }
}

fn endpoint_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[a-z0-9-]+(/[a-z0-9-]+)*$").expect("endpoint regex is valid")
    })
}
