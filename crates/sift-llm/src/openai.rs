use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, check_embedding_count};
use crate::retry::RetryPolicy;
use crate::sse::openai_sse_to_stream;

/// Network-backed provider speaking the `OpenAI` REST dialect.
///
/// Works against `api.openai.com` and any compatible gateway (vLLM, LM Studio,
/// llama.cpp server, Groq, ...).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_tokens: u32,
    embedding_model: Option<String>,
    embedding_dim: Option<usize>,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dim", &self.embedding_dim)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: Option<String>,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            max_tokens,
            embedding_model,
            embedding_dim: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Request vectors of a fixed dimension (models that support truncation).
    #[must_use]
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = Some(dim);
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .header("Content-Type", "application/json");
        match self.api_key.as_deref() {
            Some(key) => builder.header("Authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

impl LlmProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self
            .embedding_model
            .as_deref()
            .ok_or_else(|| LlmError::EmbedUnsupported {
                provider: "openai".into(),
            })?;

        let body = EmbeddingRequest {
            input: texts,
            model,
            dimensions: self.embedding_dim,
        };

        let response = self
            .retry
            .send("openai", || self.post("embeddings").json(&body).send())
            .await?;
        let response = ensure_success(response, "embeddings").await?;

        let resp: EmbeddingResponse = serde_json::from_slice(&response.bytes().await?)?;
        let vectors = order_embeddings(resp.data);
        check_embedding_count("openai", texts.len(), &vectors)?;
        Ok(vectors)
    }

    async fn generate_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            stream: true,
        };

        let response = self
            .retry
            .send("openai", || self.post("chat/completions").json(&body).send())
            .await?;
        let response = ensure_success(response, "chat/completions").await?;

        Ok(openai_sse_to_stream(response))
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embedding_dim
    }

    fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

/// Turn a non-2xx reply into `LlmError::Status`, logging the body it carried.
async fn ensure_success(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::error!(endpoint, status = status.as_u16(), "openai request rejected: {body}");
    Err(LlmError::Status {
        provider: "openai".into(),
        status: status.as_u16(),
    })
}

/// The API documents `data` as ordered by `index`, but not every compatible
/// server honors that.
fn order_embeddings(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}
