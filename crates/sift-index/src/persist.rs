use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};
use crate::types::SlotMetadata;
use crate::vector::FlatIndex;

pub(crate) const METADATA_VERSION: u32 = 2;

/// JSON sidecar describing what each slot of the index file refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct IndexMetadata {
    pub version: u32,
    pub dim: usize,
    pub count: usize,
    /// blake3 hex digest of the paired index file.
    pub index_digest: String,
    pub provider: String,
    #[serde(default)]
    pub embedding_model: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub slots: Vec<SlotMetadata>,
}

/// Settings a persisted index must have been built with to be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BuildFingerprint {
    pub provider: String,
    pub embedding_model: Option<String>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub dim: Option<usize>,
}

impl IndexMetadata {
    pub(crate) fn matches(&self, fingerprint: &BuildFingerprint) -> bool {
        self.provider == fingerprint.provider
            && self.embedding_model == fingerprint.embedding_model
            && self.chunk_size == fingerprint.chunk_size
            && self.chunk_overlap == fingerprint.chunk_overlap
            && fingerprint.dim.is_none_or(|d| d == self.dim)
    }
}

/// The index file and its metadata sidecar, always written and read together.
#[derive(Debug, Clone)]
pub(crate) struct PersistedPair {
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl PersistedPair {
    /// Write both files. Each goes to a temporary sibling first; the renames
    /// happen only after both temporaries are complete.
    pub(crate) fn save(&self, index: &FlatIndex, metadata: &mut IndexMetadata) -> Result<()> {
        let bytes = index.to_bytes();
        metadata.index_digest = blake3::hash(&bytes).to_hex().to_string();
        let json = serde_json::to_vec_pretty(metadata)?;

        let index_tmp = write_tmp(&self.index_path, &bytes)?;
        let metadata_tmp = match write_tmp(&self.metadata_path, &json) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = std::fs::remove_file(&index_tmp);
                return Err(e);
            }
        };
        std::fs::rename(&index_tmp, &self.index_path)?;
        std::fs::rename(&metadata_tmp, &self.metadata_path)?;
        Ok(())
    }

    /// Load both halves. `Ok(None)` when either file is absent; `Corrupt` when
    /// they are present but do not agree with each other.
    pub(crate) fn load(&self) -> Result<Option<(FlatIndex, IndexMetadata)>> {
        let index_exists = self.index_path.is_file();
        let metadata_exists = self.metadata_path.is_file();
        if !index_exists || !metadata_exists {
            if index_exists || metadata_exists {
                tracing::warn!(
                    index = %self.index_path.display(),
                    metadata = %self.metadata_path.display(),
                    "only one half of the persisted index exists, ignoring it"
                );
            }
            return Ok(None);
        }

        let metadata: IndexMetadata = serde_json::from_slice(&std::fs::read(&self.metadata_path)?)
            .map_err(|e| IndexError::Corrupt(format!("metadata is unreadable: {e}")))?;
        if metadata.version != METADATA_VERSION {
            return Err(IndexError::Corrupt(format!(
                "metadata version {} is not supported",
                metadata.version
            )));
        }

        let bytes = std::fs::read(&self.index_path)?;
        let digest = blake3::hash(&bytes).to_hex().to_string();
        if digest != metadata.index_digest {
            return Err(IndexError::Corrupt(
                "index file does not match its metadata".into(),
            ));
        }

        let index = FlatIndex::from_bytes(&bytes)?;
        if index.dim() != metadata.dim
            || index.len() != metadata.count
            || metadata.slots.len() != metadata.count
        {
            return Err(IndexError::Corrupt(format!(
                "index holds {}x{}, metadata describes {}x{} with {} slots",
                index.len(),
                index.dim(),
                metadata.count,
                metadata.dim,
                metadata.slots.len()
            )));
        }
        Ok(Some((index, metadata)))
    }

    /// Delete both files; missing files are not an error.
    pub(crate) fn remove(&self) -> Result<()> {
        for path in [&self.index_path, &self.metadata_path] {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_tmp(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, bytes)?;
    Ok(tmp)
}

/// Write `bytes` to `path` via a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = write_tmp(path, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
