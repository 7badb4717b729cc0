use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::env::Env;
use crate::gateway::GatewayError;

pub const CLIENT_ID_KEYS: &[&str] = &["PROKERALA_CLIENT_ID"];
pub const CLIENT_SECRET_KEYS: &[&str] = &["PROKERALA_CLIENT_SECRET"];

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3_600;

#[derive(Clone)]
pub struct OAuthToken {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

impl std::fmt::Debug for OAuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthToken")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Clone)]
pub struct OAuthClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientCredentials")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl OAuthClientCredentials {
    /// Validates the credential shape up front: the data provider issues
    /// UUID client ids, so anything else is a deployment mistake.
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        let token_url = token_url.into().trim().to_string();
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();

        if token_url.is_empty() {
            return Err(GatewayError::auth_config("oauth token_url is required"));
        }
        if client_id.is_empty() {
            return Err(GatewayError::auth_config("oauth client_id is required"));
        }
        if !client_id_regex().is_match(&client_id) {
            return Err(GatewayError::auth_config(
                "oauth client_id is malformed (expected a UUID)",
            ));
        }
        if client_secret.is_empty() {
            return Err(GatewayError::auth_config("oauth client_secret is required"));
        }

        Ok(Self {
            token_url,
            client_id,
            client_secret,
        })
    }

    pub fn from_env(token_url: &str, env: &Env) -> Result<Self, GatewayError> {
        let client_id = env.get_any(CLIENT_ID_KEYS).ok_or_else(|| {
            GatewayError::auth_config(format!(
                "missing oauth client_id (tried: {})",
                CLIENT_ID_KEYS.join(", ")
            ))
        })?;
        let client_secret = env.get_any(CLIENT_SECRET_KEYS).ok_or_else(|| {
            GatewayError::auth_config(format!(
                "missing oauth client_secret (tried: {})",
                CLIENT_SECRET_KEYS.join(", ")
            ))
        })?;
        Self::new(token_url, client_id, client_secret)
    }

    /// Performs the form-encoded client-credentials grant.
    pub async fn fetch_token(&self, http: &reqwest::Client) -> Result<OAuthToken, GatewayError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let parsed = crate::utils::http::send_json::<TokenResponse>(
            http.post(self.token_url.as_str()).form(&params),
        )
        .await
        .map_err(|err| match GatewayError::from(err) {
            // A 400 from a token endpoint means `invalid_client`/`invalid_grant`.
            GatewayError::UpstreamRejected { status, message } if status == 400 => {
                GatewayError::UpstreamAuth { message }
            }
            other => other,
        })?;

        let access_token = parsed
            .access_token
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| GatewayError::UpstreamAuth {
                message: "oauth response missing access_token".to_string(),
            })?;
        let token_type = parsed
            .token_type
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Bearer".to_string());

        Ok(OAuthToken {
            access_token,
            token_type,
            expires_in: parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

fn client_id_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
            .expect("client id regex is valid")
    })
}
