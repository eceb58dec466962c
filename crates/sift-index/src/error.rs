//! Error types for sift-index.

/// Errors raised while building, persisting or querying the index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading the corpus or the persisted index.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata sidecar serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] sift_llm::LlmError),

    #[error("chunk overlap {overlap} must be smaller than chunk size {size}")]
    InvalidChunking { size: usize, overlap: usize },

    #[error("vector dimension must be at least 1")]
    InvalidDimension,

    #[error("dimension mismatch: index has {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Persisted index or sidecar could not be trusted.
    #[error("corrupt index state: {0}")]
    Corrupt(String),

    /// A build attempt failed and no index is available.
    #[error("retrieval unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// Whether the failure comes from the environment (provider, build) rather
    /// than from the caller's input.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidChunking { .. } | Self::InvalidDimension | Self::DimensionMismatch { .. }
        )
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
