use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatStream, LlmProvider, Message, Role, check_embedding_count};

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = split_base_url(base_url);
        Self {
            client: Ollama::new(host, port),
            base_url: base_url.to_owned(),
            model,
            embedding_model,
        }
    }

    /// Check that Ollama answers, warning about configured models it lacks.
    ///
    /// # Errors
    ///
    /// Returns an error if Ollama cannot be reached.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        let models = self.client.list_local_models().await.map_err(|e| {
            LlmError::Other(format!("cannot reach Ollama at {}: {e}", self.base_url))
        })?;
        let installed = |name: &str| {
            models
                .iter()
                .any(|m| m.name == name || m.name.strip_suffix(":latest") == Some(name))
        };
        for model in [&self.model, &self.embedding_model] {
            if !installed(model) {
                tracing::warn!(model = %model, "model is not pulled in Ollama");
            }
        }
        Ok(())
    }
}

impl LlmProvider for OllamaProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        if response.embeddings.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: "ollama".into(),
            });
        }
        check_embedding_count("ollama", texts.len(), &response.embeddings)?;
        Ok(response.embeddings)
    }

    async fn generate_stream(&self, messages: &[Message]) -> Result<ChatStream, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let stream = self
            .client
            .send_chat_messages_stream(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama streaming request failed: {e}")))?;

        let mapped = stream.filter_map(|item| match item {
            Ok(response) if response.message.content.is_empty() => None,
            Ok(response) => Some(Ok(response.message.content)),
            Err(()) => Some(Err(LlmError::Other("Ollama stream chunk failed".into()))),
        });

        Ok(Box::pin(mapped))
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn embedding_model(&self) -> Option<&str> {
        Some(&self.embedding_model)
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::Assistant => ChatMessage::assistant(text),
        Role::User => ChatMessage::user(text),
    }
}

const DEFAULT_PORT: u16 = 11434;

/// Split a base URL into the `(host, port)` pair `ollama-rs` expects.
///
/// Any path is dropped; a missing or unparsable port falls back to Ollama's
/// default.
fn split_base_url(url: &str) -> (String, u16) {
    let (scheme, rest) = url.split_once("://").unwrap_or(("http", url));
    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => (authority, DEFAULT_PORT),
        },
        _ => (authority, DEFAULT_PORT),
    };
    (format!("{scheme}://{host}"), port)
}
