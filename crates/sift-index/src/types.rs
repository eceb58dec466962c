use serde::{Deserialize, Serialize};

/// A corpus file read at build time. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated.
    pub id: String,
    pub source_path: String,
    pub raw_text: String,
}

/// A contiguous slice of a document; offsets are in characters, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
}

/// What a vector slot in the index points back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub chunk_id: String,
    pub document_id: String,
    pub source_path: String,
    pub text: String,
}

/// A search hit resolved through the slot metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub text: String,
    pub source_path: String,
    pub score: f32,
}
