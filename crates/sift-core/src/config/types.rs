use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the sift service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

/// LLM provider backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Mock,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::Mock => "mock",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

fn default_max_body_size() -> usize {
    1_048_576
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Requested embedding width. Also the dimension of the mock provider and
    /// of an index built from an empty corpus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_dim: Option<usize>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_provider() -> ProviderKind {
    ProviderKind::Ollama
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_model() -> String {
    "llama3.2".into()
}

fn default_embedding_model() -> String {
    "nomic-embed-text".into()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            embedding_dim: None,
            max_tokens: default_max_tokens(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("embedding_dim", &self.embedding_dim)
            .field("max_tokens", &self.max_tokens)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_extensions() -> Vec<String> {
    sift_index::loader::DEFAULT_EXTENSIONS
        .iter()
        .map(|e| (*e).to_owned())
        .collect()
}

fn default_max_file_size() -> u64 {
    sift_index::loader::DEFAULT_MAX_FILE_SIZE
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extensions: default_extensions(),
            max_file_size: default_max_file_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
}

fn default_index_path() -> PathBuf {
    PathBuf::from(".sift/index.bin")
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from(".sift/index.meta.json")
}

fn default_chunk_size() -> usize {
    sift_index::chunker::DEFAULT_CHUNK_SIZE
}

fn default_chunk_overlap() -> usize {
    sift_index::chunker::DEFAULT_CHUNK_OVERLAP
}

fn default_embed_batch_size() -> usize {
    sift_index::store::DEFAULT_EMBED_BATCH_SIZE
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            metadata_path: default_metadata_path(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            embed_batch_size: default_embed_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatConfig {
    #[serde(default = "default_k")]
    pub default_k: usize,
    #[serde(default = "default_max_k")]
    pub max_k: usize,
    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
    #[serde(default = "default_rag_instruction")]
    pub rag_instruction: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    /// Tokens buffered between the generation task and the HTTP response.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

fn default_k() -> usize {
    3
}

fn default_max_k() -> usize {
    20
}

pub(crate) fn default_system_preamble() -> String {
    "You are a helpful assistant.".into()
}

pub(crate) fn default_rag_instruction() -> String {
    "Use ONLY the CONTEXT below to answer. If missing, say you don't know.".into()
}

fn default_generation_timeout_secs() -> u64 {
    300
}

fn default_stream_buffer() -> usize {
    32
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_k: default_max_k(),
            system_preamble: default_system_preamble(),
            rag_instruction: default_rag_instruction(),
            generation_timeout_secs: default_generation_timeout_secs(),
            stream_buffer: default_stream_buffer(),
        }
    }
}
