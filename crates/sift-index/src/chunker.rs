use crate::error::{IndexError, Result};
use crate::types::{Chunk, Document};

pub const DEFAULT_CHUNK_SIZE: usize = 800;
pub const DEFAULT_CHUNK_OVERLAP: usize = 120;

/// Fixed-size sliding window over characters.
///
/// Consecutive chunks of one document share exactly `overlap` characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl Chunker {
    /// # Errors
    ///
    /// Returns `InvalidChunking` when `size` is zero or `overlap >= size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 || overlap >= size {
            return Err(IndexError::InvalidChunking { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split a document into ordered chunks. Empty text yields no chunks;
    /// text shorter than `size` yields exactly one.
    #[must_use]
    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let text = document.raw_text.as_str();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = offsets.len() - 1;
        if total == 0 {
            return Vec::new();
        }

        let stride = self.size - self.overlap;
        let mut chunks = Vec::with_capacity(total / stride + 1);
        let mut start = 0;
        loop {
            let end = (start + self.size).min(total);
            let ordinal = chunks.len();
            chunks.push(Chunk {
                id: chunk_id(&document.id, ordinal),
                document_id: document.id.clone(),
                ordinal,
                text: text[offsets[start]..offsets[end]].to_owned(),
                char_start: start,
                char_end: end,
            });
            if end == total {
                break;
            }
            start += stride;
        }
        chunks
    }
}

/// Stable id derived from the document id and the chunk ordinal.
#[must_use]
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(ordinal as u64).to_le_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_owned()
}
