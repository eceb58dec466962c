#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{provider} kept rate limiting after {attempts} attempts")]
    RateLimited { provider: String, attempts: u32 },

    #[error("{provider} answered with status {status}")]
    Status { provider: String, status: u16 },

    #[error("provider unavailable")]
    Unavailable,

    #[error("empty response from {provider}")]
    EmptyResponse { provider: String },

    #[error("SSE parse error: {0}")]
    SseParse(String),

    #[error("embedding not supported by {provider}")]
    EmbedUnsupported { provider: String },

    #[error("{provider} returned {got} embeddings for {expected} inputs")]
    EmbeddingCount {
        provider: String,
        expected: usize,
        got: usize,
    },

    #[error("{0}")]
    Other(String),
}

impl LlmError {
    /// Whether retrying the same call later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } | Self::Unavailable => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;
