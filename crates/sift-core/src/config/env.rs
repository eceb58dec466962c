use std::path::PathBuf;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_storage();
        self.apply_env_overrides_server();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("SIFT_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.llm.provider = kind;
            } else {
                tracing::warn!("ignoring invalid SIFT_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("SIFT_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("SIFT_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("SIFT_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("SIFT_LLM_API_KEY")
            && !v.is_empty()
        {
            self.llm.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("SIFT_EMBED_DIM") {
            match v.parse::<usize>() {
                Ok(dim) if dim > 0 => self.llm.embedding_dim = Some(dim),
                _ => tracing::warn!("ignoring invalid SIFT_EMBED_DIM value: {v}"),
            }
        }
    }

    fn apply_env_overrides_storage(&mut self) {
        if let Ok(v) = std::env::var("SIFT_DATA_DIR") {
            self.corpus.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIFT_INDEX_PATH") {
            self.index.index_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIFT_METADATA_PATH") {
            self.index.metadata_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIFT_CHUNK_SIZE") {
            if let Ok(size) = v.parse::<usize>() {
                self.index.chunk_size = size;
            } else {
                tracing::warn!("ignoring invalid SIFT_CHUNK_SIZE value: {v}");
            }
        }
        if let Ok(v) = std::env::var("SIFT_CHUNK_OVERLAP") {
            if let Ok(overlap) = v.parse::<usize>() {
                self.index.chunk_overlap = overlap;
            } else {
                tracing::warn!("ignoring invalid SIFT_CHUNK_OVERLAP value: {v}");
            }
        }
    }

    fn apply_env_overrides_server(&mut self) {
        if let Ok(v) = std::env::var("SIFT_BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("SIFT_PORT") {
            if let Ok(port) = v.parse::<u16>() {
                self.server.port = port;
            } else {
                tracing::warn!("ignoring invalid SIFT_PORT value: {v}");
            }
        }
    }
}
