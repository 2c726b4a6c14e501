use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors surfaced by the prompt-pages service.
///
/// Per-image failures never reach this type; the resolver turns them into
/// placeholder images. Only request-level problems end up here.
#[derive(Error, Debug)]
pub enum PromptPagesError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The language model answered, but not in the shape we asked for.
    #[error("Malformed upstream response: {0}")]
    Upstream(String),

    #[error("Rate limit exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PromptPagesError>;

impl PromptPagesError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Upstream(_) | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for PromptPagesError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = match self {
            Self::Validation(msg) => msg,
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
