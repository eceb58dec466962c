//! Retrieval engine: corpus loading, chunking, a flat inner-product index,
//! its on-disk persistence, and the lazily built [`RetrievalStore`].

pub mod chunker;
pub mod error;
pub mod loader;
pub(crate) mod persist;
pub mod store;
pub mod types;
pub mod vector;

pub use chunker::Chunker;
pub use error::{IndexError, Result};
pub use loader::{DocumentLoader, LoadReport};
pub use store::{Lifecycle, RetrievalStore, Snapshot, StoreConfig, StoreStatus};
pub use types::{Chunk, Document, RetrievedChunk, SlotMetadata};
pub use vector::{FlatIndex, SearchResult};
