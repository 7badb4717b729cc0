use thiserror::Error;

/// Transport-level failure talking to an upstream service.
///
/// Callers inside the gateway never surface this directly; it is classified
/// into a [`crate::gateway::GatewayError`] first.
#[derive(Debug, Error)]
pub enum AstroError {
    #[error("api error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("failed to parse json: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AstroError>;
