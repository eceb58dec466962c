use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Incremental text deltas produced by a streaming generation call.
///
/// Dropping the stream releases the upstream request.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

pub trait LlmProvider: Send + Sync {
    /// Embed every input text, returning one vector per input in the same order.
    ///
    /// An empty input yields an empty output without contacting the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable, rejects the request, or
    /// returns a different number of vectors than inputs.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, LlmError>> + Send;

    /// Start a streaming generation for the given conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be opened. Failures after the
    /// stream has started are yielded as stream items.
    fn generate_stream(
        &self,
        messages: &[Message],
    ) -> impl Future<Output = Result<ChatStream, LlmError>> + Send;

    /// Dimension of the vectors returned by [`LlmProvider::embed`], when known
    /// without a round trip.
    fn embedding_dim(&self) -> Option<usize> {
        None
    }

    /// Model that produces the embeddings. Vectors from different models are
    /// not comparable even when their dimensions agree.
    fn embedding_model(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> &str;
}

/// Check that a backend returned exactly one vector per input.
pub(crate) fn check_embedding_count(
    provider: &str,
    expected: usize,
    vectors: &[Vec<f32>],
) -> Result<(), LlmError> {
    if vectors.len() == expected {
        Ok(())
    } else {
        Err(LlmError::EmbeddingCount {
            provider: provider.to_owned(),
            expected,
            got: vectors.len(),
        })
    }
}
