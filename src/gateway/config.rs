use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::limits::RateLimitConfig;
use super::retry::RetryPolicy;
use crate::auth::oauth::{CLIENT_ID_KEYS, CLIENT_SECRET_KEYS};
use crate::env::Env;
use crate::prompt::TruncationThresholds;
use crate::providers::ProviderKind;

pub use crate::providers::ProviderSettings;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,
}

fn default_token_url() -> String {
    "https://api.prokerala.com/token".to_string()
}

fn default_safety_margin_ms() -> u64 {
    600_000
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            safety_margin_ms: default_safety_margin_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataApiConfig {
    #[serde(default = "default_data_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_data_api_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_data_api_base_url() -> String {
    "https://api.prokerala.com/v2/astrology".to_string()
}

fn default_data_api_timeout_ms() -> u64 {
    20_000
}

impl Default for DataApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_data_api_base_url(),
            timeout_ms: default_data_api_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeocodeConfig {
    #[serde(default = "default_geocode_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_geocode_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_geocode_url() -> String {
    "https://nominatim.openstreetmap.org/search".to_string()
}

fn default_user_agent() -> String {
    concat!("astro-gateway/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_geocode_timeout_ms() -> u64 {
    10_000
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            url: default_geocode_url(),
            user_agent: default_user_agent(),
            timeout_ms: default_geocode_timeout_ms(),
        }
    }
}

/// Credentials resolved from the environment. Never read from the config
/// file and never serialized.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct GatewaySecrets {
    pub together_api_key: Option<String>,
    pub claude_api_key: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_client_secret: Option<String>,
}

impl std::fmt::Debug for GatewaySecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn present(value: &Option<String>) -> &'static str {
            if value.is_some() { "<redacted>" } else { "<unset>" }
        }
        f.debug_struct("GatewaySecrets")
            .field("together_api_key", &present(&self.together_api_key))
            .field("claude_api_key", &present(&self.claude_api_key))
            .field("oauth_client_id", &present(&self.oauth_client_id))
            .field("oauth_client_secret", &present(&self.oauth_client_secret))
            .finish()
    }
}

impl GatewaySecrets {
    pub fn from_env(env: &Env) -> Self {
        Self {
            together_api_key: env.get_any(ProviderKind::Together.api_key_env_keys()),
            claude_api_key: env.get_any(ProviderKind::Claude.api_key_env_keys()),
            oauth_client_id: env.get_any(CLIENT_ID_KEYS),
            oauth_client_secret: env.get_any(CLIENT_SECRET_KEYS),
        }
    }

    /// Every configured secret value, for log redaction.
    pub fn values(&self) -> Vec<String> {
        [
            &self.together_api_key,
            &self.claude_api_key,
            &self.oauth_client_secret,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub primary: ProviderSettings,
    #[serde(default)]
    pub fallback: ProviderSettings,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub data_api: DataApiConfig,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "RetryPolicy::reprompt")]
    pub reprompt_retry: RetryPolicy,
    #[serde(default)]
    pub truncation: TruncationThresholds,
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    #[serde(skip)]
    pub secrets: GatewaySecrets,
}

fn default_request_deadline_ms() -> u64 {
    55_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary: ProviderSettings::default(),
            fallback: ProviderSettings::default(),
            oauth: OAuthConfig::default(),
            data_api: DataApiConfig::default(),
            geocode: GeocodeConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            reprompt_retry: RetryPolicy::reprompt(),
            truncation: TruncationThresholds::default(),
            request_deadline_ms: default_request_deadline_ms(),
            secrets: GatewaySecrets::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|err| format!("invalid gateway config: {err}"))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| format!("read config {}: {err}", path.display()))?;
        Self::from_toml_str(&raw)
    }

    /// Resolves secrets and applies numeric overrides from the environment.
    pub fn apply_env(&mut self, env: &Env) -> Result<(), String> {
        self.secrets = GatewaySecrets::from_env(env);

        if let Some(value) = env.parse::<u32>("RATE_LIMIT_MAX_REQUESTS")? {
            self.rate_limit.max_requests = value;
        }
        if let Some(value) = env.parse::<u64>("RATE_LIMIT_WINDOW_MS")? {
            self.rate_limit.window_ms = value;
        }
        if let Some(value) = env.parse::<u32>("RETRY_MAX_ATTEMPTS")? {
            self.retry.max_attempts = value;
        }
        if let Some(value) = env.parse::<u64>("RETRY_BASE_DELAY_MS")? {
            self.retry.base_delay_ms = value;
        }
        if let Some(value) = env.parse::<f64>("RETRY_BACKOFF_FACTOR")? {
            self.retry.backoff_factor = value;
        }
        if let Some(value) = env.parse::<u64>("RETRY_JITTER_MS")? {
            self.retry.jitter_ms = value;
        }
        if let Some(value) = env.parse::<u64>("REQUEST_DEADLINE_MS")? {
            self.request_deadline_ms = value;
        }
        Ok(())
    }

    pub fn with_secrets(mut self, secrets: GatewaySecrets) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        self.retry
            .validate()
            .map_err(|err| format!("retry: {err}"))?;
        self.reprompt_retry
            .validate()
            .map_err(|err| format!("reprompt_retry: {err}"))?;
        if self.rate_limit.window_ms == 0 {
            return Err("rate_limit window_ms must be positive".to_string());
        }
        if self.rate_limit.max_requests == 0 {
            return Err("rate_limit max_requests must be positive".to_string());
        }
        if self.request_deadline_ms == 0 {
            return Err("request_deadline_ms must be positive".to_string());
        }
        for (name, settings) in [("primary", &self.primary), ("fallback", &self.fallback)] {
            if settings.max_tokens_ceiling == Some(0) {
                return Err(format!("{name} max_tokens_ceiling must be positive"));
            }
            if settings.timeout_ms == Some(0) {
                return Err(format!("{name} timeout_ms must be positive"));
            }
        }
        if self.oauth.token_url.trim().is_empty() {
            return Err("oauth token_url is required".to_string());
        }
        Ok(())
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GatewayConfig::default();
        assert_eq!(config.rate_limit.max_requests, 50);
        assert_eq!(config.rate_limit.window_ms, 60_000);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.reprompt_retry.max_attempts, 1);
        assert_eq!(config.request_deadline_ms, 55_000);
        assert!(config.secrets.values().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = GatewayConfig::from_toml_str(
            r#"
request_deadline_ms = 30000

[primary]
base_url = "http://127.0.0.1:9000/v1"

[retry]
max_attempts = 5

[truncation]
min_completion_tokens = 100
"#,
        )
        .expect("config");
        assert_eq!(config.request_deadline_ms, 30_000);
        assert_eq!(config.primary.base_url.as_deref(), Some("http://127.0.0.1:9000/v1"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 1_000);
        assert_eq!(config.truncation.min_completion_tokens, 100);
        assert_eq!(config.truncation.min_content_chars, 1_000);
        assert_eq!(config.reprompt_retry, RetryPolicy::reprompt());
    }

    #[test]
    fn env_overrides_and_secrets() {
        let env = Env::parse_dotenv(
            "TOGETHER_API_KEY=tk-1\nCLAUDE_API_KEY=sk-2\nRETRY_MAX_ATTEMPTS=4\nRATE_LIMIT_MAX_REQUESTS=10\nRETRY_BACKOFF_FACTOR=1.5\n",
        )
        .dotenv_only();
        let mut config = GatewayConfig::default();
        config.apply_env(&env).expect("env");
        assert_eq!(config.secrets.together_api_key.as_deref(), Some("tk-1"));
        assert_eq!(config.secrets.claude_api_key.as_deref(), Some("sk-2"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_factor, 1.5);
        assert_eq!(config.rate_limit.max_requests, 10);

        let debug = format!("{config:?}");
        assert!(!debug.contains("tk-1"));
        assert!(!debug.contains("sk-2"));
    }

    #[test]
    fn malformed_env_values_are_rejected() {
        let env = Env::parse_dotenv("RETRY_MAX_ATTEMPTS=lots\n").dotenv_only();
        let mut config = GatewayConfig::default();
        let err = config.apply_env(&env).unwrap_err();
        assert!(err.contains("RETRY_MAX_ATTEMPTS"));
    }

    #[test]
    fn validate_rejects_unusable_settings() {
        let mut config = GatewayConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.retry.backoff_factor = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.rate_limit.window_ms = 0;
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.request_deadline_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[rate_limit]\nmax_requests = 7\n").expect("write");
        let config = GatewayConfig::load(&path).expect("load");
        assert_eq!(config.rate_limit.max_requests, 7);
        assert_eq!(config.rate_limit.window_ms, 60_000);

        let err = GatewayConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.contains("missing.toml"));
    }
}
