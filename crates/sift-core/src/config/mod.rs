mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if
    /// the resulting settings are inconsistent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index.chunk_size == 0 {
            bail!("index.chunk_size must be at least 1");
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            bail!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap,
                self.index.chunk_size
            );
        }
        if self.index.embed_batch_size == 0 {
            bail!("index.embed_batch_size must be at least 1");
        }
        if self.llm.embedding_dim == Some(0) {
            bail!("llm.embedding_dim must be at least 1");
        }
        if self.chat.default_k > self.chat.max_k {
            bail!(
                "chat.default_k ({}) exceeds chat.max_k ({})",
                self.chat.default_k,
                self.chat.max_k
            );
        }
        if self.chat.stream_buffer == 0 {
            bail!("chat.stream_buffer must be at least 1");
        }
        if self.chat.generation_timeout_secs == 0 {
            bail!("chat.generation_timeout_secs must be at least 1");
        }
        Ok(())
    }
}
