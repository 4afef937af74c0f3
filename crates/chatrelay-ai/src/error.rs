//! Error types for upstream calls

use thiserror::Error;

/// Upstream error types
#[derive(Error, Debug)]
pub enum AiError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("{provider} API error ({status}): {message}")]
    LlmHttp {
        provider: String,
        status: u16,
        message: String,
        retry_after_secs: Option<u64>,
    },

    /// Failure reported by the upstream in the middle of a stream.
    #[error("{0}")]
    Upstream(String),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AiError {
    /// HTTP status reported by the upstream, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AiError::LlmHttp { status, .. } => Some(*status),
            AiError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            AiError::LlmHttp {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for upstream operations
pub type Result<T> = std::result::Result<T, AiError>;
