//! Completion gateway: configuration, admission, retries, provider routing
//! and the request state machine.

pub mod config;
pub mod handler;
pub mod limits;
pub mod observability;
pub mod redaction;
pub mod retry;
pub mod router;
pub mod telemetry;

#[cfg(feature = "gateway")]
pub mod http;

use thiserror::Error;

use crate::AstroError;

pub use config::{
    DataApiConfig, GatewayConfig, GatewaySecrets, GeocodeConfig, OAuthConfig, ProviderSettings,
};
pub use handler::{ChatGateway, ChatOutcome, GatewayStage};
pub use limits::{RateLimitConfig, RateLimiter};
pub use observability::{Observability, ObservabilitySnapshot};
pub use retry::{Deadline, JitterSource, NoJitter, RandomJitter, RetryOrchestrator, RetryPolicy};
pub use router::{ProviderRouter, RoutedCompletion};

#[cfg(feature = "gateway")]
pub use http::{AppState, router as http_router};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("invalid request: {reason}")]
    Validation { reason: String },
    #[error("auth configuration error: {reason}")]
    AuthConfig { reason: String },
    #[error("upstream rejected credentials: {message}")]
    UpstreamAuth { message: String },
    #[error("rate limit exceeded: {limit}")]
    RateLimited { limit: String },
    #[error("upstream timed out: {message}")]
    UpstreamTimeout { message: String },
    #[error("upstream error{}: {message}", .status.map(|code| format!(" ({code})")).unwrap_or_default())]
    UpstreamServer { status: Option<u16>, message: String },
    #[error("upstream rejected request ({status}): {message}")]
    UpstreamRejected { status: u16, message: String },
    #[error("request deadline exceeded: {detail}")]
    DeadlineExceeded { detail: String },
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn auth_config(reason: impl Into<String>) -> Self {
        Self::AuthConfig {
            reason: reason.into(),
        }
    }

    /// Transient upstream failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamTimeout { .. } | Self::UpstreamServer { .. }
        )
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::AuthConfig { .. } => 500,
            Self::UpstreamAuth { .. } => 502,
            Self::RateLimited { .. } => 429,
            Self::UpstreamTimeout { .. } => 504,
            Self::UpstreamServer { .. } => 502,
            Self::UpstreamRejected { .. } => 502,
            Self::DeadlineExceeded { .. } => 504,
            Self::Internal { .. } => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::AuthConfig { .. } => "auth_config_error",
            Self::UpstreamAuth { .. } => "upstream_auth_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamServer { .. } => "upstream_server_error",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<AstroError> for GatewayError {
    fn from(err: AstroError) -> Self {
        match err {
            AstroError::Api { status, body } => {
                let code = status.as_u16();
                match code {
                    401 | 403 => Self::UpstreamAuth { message: body },
                    408 | 504 => Self::UpstreamTimeout { message: body },
                    429 | 500..=599 => Self::UpstreamServer {
                        status: Some(code),
                        message: body,
                    },
                    _ => Self::UpstreamRejected {
                        status: code,
                        message: body,
                    },
                }
            }
            AstroError::Http(err) if err.is_timeout() => Self::UpstreamTimeout {
                message: err.to_string(),
            },
            AstroError::Http(err) => Self::UpstreamServer {
                status: err.status().map(|status| status.as_u16()),
                message: err.to_string(),
            },
            AstroError::InvalidResponse(message) => Self::UpstreamServer {
                status: None,
                message: format!("invalid response: {message}"),
            },
            AstroError::Json(err) => Self::UpstreamServer {
                status: None,
                message: format!("invalid response: {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(code: u16) -> GatewayError {
        AstroError::Api {
            status: reqwest::StatusCode::from_u16(code).unwrap(),
            body: format!("status {code}"),
        }
        .into()
    }

    #[test]
    fn classifies_upstream_statuses() {
        assert!(matches!(api(401), GatewayError::UpstreamAuth { .. }));
        assert!(matches!(api(408), GatewayError::UpstreamTimeout { .. }));
        assert!(matches!(
            api(429),
            GatewayError::UpstreamServer {
                status: Some(429),
                ..
            }
        ));
        assert!(matches!(api(503), GatewayError::UpstreamServer { .. }));
        assert!(matches!(
            api(422),
            GatewayError::UpstreamRejected { status: 422, .. }
        ));
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(api(500).is_retryable());
        assert!(api(504).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!GatewayError::validation("x").is_retryable());
        assert!(
            !GatewayError::RateLimited {
                limit: "50/60000ms".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn maps_taxonomy_to_http_status() {
        assert_eq!(GatewayError::validation("x").status_code(), 400);
        assert_eq!(GatewayError::auth_config("x").status_code(), 500);
        assert_eq!(api(401).status_code(), 502);
        assert_eq!(api(504).status_code(), 504);
        assert_eq!(api(502).status_code(), 502);
        assert_eq!(
            GatewayError::RateLimited {
                limit: String::new()
            }
            .status_code(),
            429
        );
    }
}
