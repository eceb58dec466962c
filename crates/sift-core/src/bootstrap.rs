//! Application wiring: provider selection, store and orchestrator construction.

use std::sync::Arc;

use anyhow::Context;
use sift_index::{RetrievalStore, StoreConfig};
use sift_llm::LlmProvider;
use sift_llm::any::AnyProvider;
use sift_llm::ollama::OllamaProvider;
use sift_llm::openai::OpenAiProvider;

use crate::config::{Config, ProviderKind};
use crate::orchestrator::{OrchestratorSettings, StreamOrchestrator};

/// Shared services handed to the HTTP layer.
pub struct App<P> {
    pub provider: Arc<P>,
    pub store: Arc<RetrievalStore<P>>,
    pub orchestrator: Arc<StreamOrchestrator<P>>,
}

impl<P> Clone for App<P> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }
}

/// # Errors
///
/// Returns an error if the selected provider is not compiled in.
pub fn create_provider(config: &Config) -> anyhow::Result<AnyProvider> {
    match config.llm.provider {
        ProviderKind::Ollama => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &config.llm.base_url,
            config.llm.model.clone(),
            config.llm.embedding_model.clone(),
        ))),
        ProviderKind::OpenAi => {
            let mut provider = OpenAiProvider::new(
                config.llm.api_key.clone(),
                config.llm.base_url.clone(),
                config.llm.model.clone(),
                config.llm.max_tokens,
                Some(config.llm.embedding_model.clone()),
            );
            if let Some(dim) = config.llm.embedding_dim {
                provider = provider.with_embedding_dim(dim);
            }
            Ok(AnyProvider::OpenAi(provider))
        }
        #[cfg(feature = "mock")]
        ProviderKind::Mock => Ok(AnyProvider::Mock(sift_llm::mock::MockProvider::new(
            config
                .llm
                .embedding_dim
                .unwrap_or(sift_index::store::DEFAULT_EMBED_DIM),
        ))),
        #[cfg(not(feature = "mock"))]
        ProviderKind::Mock => {
            anyhow::bail!("the mock provider requires building with the `mock` feature")
        }
    }
}

#[must_use]
pub fn store_config(config: &Config) -> StoreConfig {
    StoreConfig {
        data_dir: config.corpus.data_dir.clone(),
        index_path: config.index.index_path.clone(),
        metadata_path: config.index.metadata_path.clone(),
        chunk_size: config.index.chunk_size,
        chunk_overlap: config.index.chunk_overlap,
        embed_batch_size: config.index.embed_batch_size,
        default_dim: config
            .llm
            .embedding_dim
            .unwrap_or(sift_index::store::DEFAULT_EMBED_DIM),
        extensions: config.corpus.extensions.clone(),
        max_file_size: config.corpus.max_file_size,
    }
}

/// Build the store and orchestrator around an already constructed provider.
///
/// # Errors
///
/// Returns an error if the index settings are invalid.
pub fn build_app<P: LlmProvider + 'static>(config: &Config, provider: P) -> anyhow::Result<App<P>> {
    let provider = Arc::new(provider);
    let store = Arc::new(
        RetrievalStore::new(Arc::clone(&provider), store_config(config))
            .context("failed to create retrieval store")?,
    );
    let orchestrator = Arc::new(StreamOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&provider),
        OrchestratorSettings::from(config),
    ));
    tracing::info!(
        provider = provider.name(),
        data_dir = %config.corpus.data_dir.display(),
        index = %config.index.index_path.display(),
        "services initialized"
    );
    Ok(App {
        provider,
        store,
        orchestrator,
    })
}

/// Log whether the configured backend is reachable. Never fails startup.
pub async fn health_check(provider: &AnyProvider) {
    match provider {
        AnyProvider::Ollama(ollama) => match ollama.health_check().await {
            Ok(()) => tracing::info!("ollama health check passed"),
            Err(e) => tracing::warn!("ollama health check failed: {e:#}"),
        },
        other => tracing::debug!(provider = other.name(), "no health check for provider"),
    }
}
