use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OllamaError>;

/// Transport-level failures from the generation endpoint. The caller owns
/// retries; nothing here is retried internally.
#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Ollama unavailable: {0}")]
    Unavailable(String),

    #[error("Ollama API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response body: {0}")]
    Body(String),
}

impl OllamaError {
    /// True for failures worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            OllamaError::Timeout(_) | OllamaError::Unavailable(_) => true,
            OllamaError::Api { status, .. } => *status >= 500 || *status == 429,
            OllamaError::Body(_) => false,
        }
    }
}

impl From<serde_json::Error> for OllamaError {
    fn from(err: serde_json::Error) -> Self {
        OllamaError::Body(err.to_string())
    }
}
