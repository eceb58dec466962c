//! Lazily built, persisted retrieval index shared by all requests.
//!
//! The first caller to need the index either loads the persisted pair or
//! builds it from the corpus. Concurrent callers wait on the same build and
//! never start a second one.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use sift_llm::LlmProvider;

use crate::chunker::{Chunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::error::{IndexError, Result};
use crate::loader::{DEFAULT_EXTENSIONS, DEFAULT_MAX_FILE_SIZE, DocumentLoader};
use crate::persist::{BuildFingerprint, IndexMetadata, METADATA_VERSION, PersistedPair};
use crate::types::{Chunk, RetrievedChunk, SlotMetadata};
use crate::vector::FlatIndex;

pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
pub const DEFAULT_EMBED_DIM: usize = 256;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    pub index_path: PathBuf,
    pub metadata_path: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    /// Dimension recorded for an empty corpus when the provider does not report one.
    pub default_dim: usize,
    pub extensions: Vec<String>,
    pub max_file_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            index_path: PathBuf::from(".sift/index.bin"),
            metadata_path: PathBuf::from(".sift/index.meta.json"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            default_dim: DEFAULT_EMBED_DIM,
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| (*e).to_owned()).collect(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStatus {
    pub lifecycle: Lifecycle,
    pub chunks: Option<usize>,
    pub documents: Option<usize>,
    pub dim: Option<usize>,
    pub rebuilds: u64,
    pub last_error: Option<String>,
}

/// An immutable, fully built index with its slot metadata.
#[derive(Debug)]
pub struct Snapshot {
    index: FlatIndex,
    metadata: IndexMetadata,
    /// Read back from disk rather than embedded by this process.
    loaded: bool,
}

impl Snapshot {
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.index.dim()
    }

    #[must_use]
    pub fn slot(&self, slot: usize) -> Option<&SlotMetadata> {
        self.metadata.slots.get(slot)
    }

    fn document_count(&self) -> usize {
        self.metadata
            .slots
            .iter()
            .map(|s| s.document_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

pub struct RetrievalStore<P> {
    provider: Arc<P>,
    config: StoreConfig,
    loader: DocumentLoader,
    chunker: Chunker,
    files: PersistedPair,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    lifecycle: Mutex<Lifecycle>,
    /// Held for the whole of a load or build; stores the last failure.
    build_lock: tokio::sync::Mutex<Option<String>>,
    attempts: AtomicU64,
    rebuilds: AtomicU64,
    retrievals: AtomicU64,
}

impl<P> std::fmt::Debug for RetrievalStore<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalStore")
            .field("config", &self.config)
            .field(
                "lifecycle",
                &*self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner),
            )
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> RetrievalStore<P> {
    /// # Errors
    ///
    /// Returns `InvalidChunking` if the chunk settings are inconsistent.
    pub fn new(provider: Arc<P>, config: StoreConfig) -> Result<Self> {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;
        let loader = DocumentLoader::new(config.extensions.clone(), config.max_file_size);
        let files = PersistedPair {
            index_path: config.index_path.clone(),
            metadata_path: config.metadata_path.clone(),
        };
        Ok(Self {
            provider,
            config,
            loader,
            chunker,
            files,
            snapshot: RwLock::new(None),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            build_lock: tokio::sync::Mutex::new(None),
            attempts: AtomicU64::new(0),
            rebuilds: AtomicU64::new(0),
            retrievals: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of full rebuilds from the corpus since startup.
    #[must_use]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Acquire)
    }

    /// Number of `retrieve` calls since startup.
    #[must_use]
    pub fn retrieve_count(&self) -> u64 {
        self.retrievals.load(Ordering::Acquire)
    }

    /// The published snapshot, if any, without triggering a build.
    #[must_use]
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn status(&self) -> StoreStatus {
        let snapshot = self.current();
        let last_error = match self.build_lock.try_lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };
        StoreStatus {
            lifecycle: self.lifecycle(),
            chunks: snapshot.as_ref().map(|s| s.len()),
            documents: snapshot.as_ref().map(|s| s.document_count()),
            dim: snapshot.as_ref().map(|s| s.dim()),
            rebuilds: self.rebuild_count(),
            last_error,
        }
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn publish(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
        self.set_lifecycle(Lifecycle::Ready);
    }

    fn fingerprint(&self) -> BuildFingerprint {
        BuildFingerprint {
            provider: self.provider.name().to_owned(),
            embedding_model: self.provider.embedding_model().map(str::to_owned),
            chunk_size: self.chunker.size(),
            chunk_overlap: self.chunker.overlap(),
            dim: self.provider.embedding_dim(),
        }
    }

    /// Return the ready snapshot, loading or building it first if needed.
    ///
    /// At most one load or build runs at a time. Callers that waited on an
    /// attempt which failed get that failure instead of starting another.
    ///
    /// # Errors
    ///
    /// Returns the build error, or `Unavailable` for callers that waited on a
    /// failed build.
    pub async fn ensure_ready(&self) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }

        let observed = self.attempts.load(Ordering::Acquire);
        let mut last_failure = self.build_lock.lock().await;

        if let Some(snapshot) = self.current() {
            return Ok(snapshot);
        }
        if self.attempts.load(Ordering::Acquire) != observed
            && let Some(reason) = last_failure.as_ref()
        {
            return Err(IndexError::Unavailable(reason.clone()));
        }

        self.attempts.fetch_add(1, Ordering::AcqRel);
        *last_failure = None;
        self.set_lifecycle(Lifecycle::Loading);

        match self.load_or_build().await {
            Ok(snapshot) => {
                self.publish(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(e) => {
                tracing::error!("retrieval index unavailable: {e}");
                *last_failure = Some(e.to_string());
                self.set_lifecycle(Lifecycle::Failed);
                Err(e)
            }
        }
    }

    /// Force a rebuild from the corpus. A published snapshot keeps serving,
    /// and the lifecycle stays `Ready`, until the new one replaces it. On
    /// failure the previous snapshot, if any, stays published.
    ///
    /// # Errors
    ///
    /// Returns the build error.
    pub async fn rebuild(&self) -> Result<Arc<Snapshot>> {
        let mut last_failure = self.build_lock.lock().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);
        *last_failure = None;
        let had_snapshot = self.current().is_some();
        if !had_snapshot {
            self.set_lifecycle(Lifecycle::Loading);
        }

        match self.build().await {
            Ok(snapshot) => {
                self.publish(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(e) => {
                tracing::error!("index rebuild failed: {e}");
                *last_failure = Some(e.to_string());
                self.set_lifecycle(if had_snapshot {
                    Lifecycle::Ready
                } else {
                    Lifecycle::Failed
                });
                Err(e)
            }
        }
    }

    /// Drop the in-memory snapshot and delete the persisted pair so the next
    /// `ensure_ready` rebuilds from the corpus.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the files cannot be removed.
    pub async fn invalidate(&self) -> Result<()> {
        let mut last_failure = self.build_lock.lock().await;
        let files = self.files.clone();
        run_blocking(move || files.remove()).await?;
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        *last_failure = None;
        self.set_lifecycle(Lifecycle::Uninitialized);
        tracing::info!("retrieval index invalidated");
        Ok(())
    }

    /// Embed `query` and return up to `k` best chunks, best first.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be made ready or the query cannot
    /// be embedded.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        self.retrievals.fetch_add(1, Ordering::AcqRel);
        let mut snapshot = self.ensure_ready().await?;
        if k == 0 || snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let query_vector = self
            .provider
            .embed(&[query.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IndexError::Unavailable("provider returned no query embedding".into()))?;

        let hits = match snapshot.index.search(&query_vector, k) {
            Err(IndexError::DimensionMismatch { expected, got }) if snapshot.loaded => {
                tracing::warn!(
                    expected,
                    got,
                    "persisted index does not match the embedding backend, rebuilding"
                );
                snapshot = self.replace_stale(&snapshot).await?;
                if snapshot.is_empty() {
                    return Ok(Vec::new());
                }
                snapshot.index.search(&query_vector, k)?
            }
            result => result?,
        };
        let chunks: Vec<RetrievedChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                snapshot.slot(hit.slot).map(|meta| RetrievedChunk {
                    chunk_id: meta.chunk_id.clone(),
                    text: meta.text.clone(),
                    source_path: meta.source_path.clone(),
                    score: hit.score,
                })
            })
            .collect();
        tracing::debug!(k, returned = chunks.len(), "retrieved chunks");
        Ok(chunks)
    }

    /// Rebuild in place of `stale`, unless another caller already replaced it.
    async fn replace_stale(&self, stale: &Arc<Snapshot>) -> Result<Arc<Snapshot>> {
        let mut last_failure = self.build_lock.lock().await;
        if let Some(current) = self.current()
            && !Arc::ptr_eq(&current, stale)
        {
            return Ok(current);
        }
        self.attempts.fetch_add(1, Ordering::AcqRel);
        *last_failure = None;

        match self.build().await {
            Ok(snapshot) => {
                self.publish(Arc::clone(&snapshot));
                Ok(snapshot)
            }
            Err(e) => {
                tracing::error!("retrieval index unavailable: {e}");
                *last_failure = Some(e.to_string());
                *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
                self.set_lifecycle(Lifecycle::Failed);
                Err(e)
            }
        }
    }

    async fn load_or_build(&self) -> Result<Arc<Snapshot>> {
        let files = self.files.clone();
        match run_blocking(move || files.load()).await {
            Ok(Some((index, metadata))) if metadata.matches(&self.fingerprint()) => {
                tracing::info!(
                    chunks = index.len(),
                    dim = index.dim(),
                    path = %self.files.index_path.display(),
                    "loaded persisted index"
                );
                return Ok(Arc::new(Snapshot {
                    index,
                    metadata,
                    loaded: true,
                }));
            }
            Ok(Some(_)) => {
                tracing::info!("persisted index was built with different settings, rebuilding");
            }
            Ok(None) => tracing::debug!("no persisted index, building from corpus"),
            Err(e) => tracing::warn!("persisted index unusable, rebuilding: {e}"),
        }
        self.build().await
    }

    async fn build(&self) -> Result<Arc<Snapshot>> {
        let started = Instant::now();
        self.rebuilds.fetch_add(1, Ordering::AcqRel);

        let loader = self.loader.clone();
        let root = self.config.data_dir.clone();
        let (documents, report) = run_blocking(move || Ok(loader.load(&root))).await?;

        let chunks: Vec<(Chunk, String)> = documents
            .iter()
            .flat_map(|d| {
                self.chunker
                    .chunk(d)
                    .into_iter()
                    .map(|c| (c, d.source_path.clone()))
            })
            .collect();
        let vectors = self.embed_chunks(&chunks).await?;

        let expected_dim = self.provider.embedding_dim();
        let dim = vectors
            .first()
            .map(Vec::len)
            .or(expected_dim)
            .unwrap_or(self.config.default_dim);
        if let Some(expected) = expected_dim
            && expected != dim
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                got: dim,
            });
        }
        let index = FlatIndex::build(dim, &vectors)?;

        let slots = chunks
            .into_iter()
            .map(|(c, source_path)| SlotMetadata {
                chunk_id: c.id,
                document_id: c.document_id,
                source_path,
                text: c.text,
            })
            .collect();

        let mut metadata = IndexMetadata {
            version: METADATA_VERSION,
            dim,
            count: index.len(),
            index_digest: String::new(),
            provider: self.provider.name().to_owned(),
            embedding_model: self.provider.embedding_model().map(str::to_owned),
            chunk_size: self.chunker.size(),
            chunk_overlap: self.chunker.overlap(),
            slots,
        };

        let files = self.files.clone();
        let (index, metadata) = run_blocking(move || {
            if let Err(e) = files.save(&index, &mut metadata) {
                tracing::warn!("failed to persist index, serving from memory: {e}");
            }
            Ok((index, metadata))
        })
        .await?;

        tracing::info!(
            documents = report.loaded,
            chunks = index.len(),
            dim,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "retrieval index built"
        );
        Ok(Arc::new(Snapshot {
            index,
            metadata,
            loaded: false,
        }))
    }

    async fn embed_chunks(&self, chunks: &[(Chunk, String)]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|(c, _)| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            let embedded = self.provider.embed(batch).await?;
            if embedded.len() != batch.len() {
                return Err(IndexError::Unavailable(format!(
                    "provider returned {} embeddings for {} chunks",
                    embedded.len(),
                    batch.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IndexError::Other(format!("blocking task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use sift_llm::mock::MockProvider;

    use super::*;

    fn config(root: &Path) -> StoreConfig {
        StoreConfig {
            data_dir: root.join("data"),
            index_path: root.join("state/index.bin"),
            metadata_path: root.join("state/index.meta.json"),
            chunk_size: 200,
            chunk_overlap: 20,
            embed_batch_size: 2,
            ..StoreConfig::default()
        }
    }

    fn write_corpus(root: &Path, files: &[(&str, &str)]) {
        let data = root.join("data");
        std::fs::create_dir_all(&data).unwrap();
        for (name, text) in files {
            std::fs::write(data.join(name), text).unwrap();
        }
    }

    fn store(root: &Path, provider: MockProvider) -> RetrievalStore<MockProvider> {
        RetrievalStore::new(Arc::new(provider), config(root)).unwrap()
    }

    #[tokio::test]
    async fn retrieves_matching_document() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(
            dir.path(),
            &[
                ("a.txt", "Project RAG Homework demo."),
                ("b.txt", "Unrelated text about gardening and tomatoes."),
            ],
        );
        let store = store(dir.path(), MockProvider::new(128));

        let hits = store.retrieve("RAG homework demo", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "Project RAG Homework demo.");
        assert!(hits[0].source_path.ends_with("a.txt"));
        assert_eq!(store.lifecycle(), Lifecycle::Ready);
        assert_eq!(store.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn k_larger_than_index_returns_all() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "alpha"), ("b.txt", "beta")]);
        let store = store(dir.path(), MockProvider::new(32));
        assert_eq!(store.retrieve("alpha", 10).await.unwrap().len(), 2);
        assert!(store.retrieve("alpha", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "one"), ("b.txt", "two"), ("c.txt", "three")]);
        let provider = MockProvider::new(16).with_embed_delay(20);
        let counters = Arc::clone(&provider.counters);
        let store = Arc::new(store(dir.path(), provider));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.ensure_ready().await.map(|s| s.len()) })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 3);
        }
        assert_eq!(store.rebuild_count(), 1);
        assert_eq!(counters.texts_embedded.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_corpus_builds_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new(16);
        let counters = Arc::clone(&provider.counters);
        let store = store(dir.path(), provider);

        assert!(store.retrieve("anything", 3).await.unwrap().is_empty());
        assert_eq!(counters.embed_calls.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("state/index.bin").exists());
        assert!(dir.path().join("state/index.meta.json").exists());
        assert_eq!(store.current().unwrap().dim(), 16);
    }

    #[tokio::test]
    async fn persisted_index_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "persist me please")]);

        let first = store(dir.path(), MockProvider::new(32));
        let before = first.retrieve("persist", 1).await.unwrap();
        assert_eq!(first.rebuild_count(), 1);

        let second = store(dir.path(), MockProvider::new(32));
        let after = second.retrieve("persist", 1).await.unwrap();
        assert_eq!(second.rebuild_count(), 0);
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn stale_settings_force_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "some text")]);
        store(dir.path(), MockProvider::new(32))
            .ensure_ready()
            .await
            .unwrap();

        let other_dim = store(dir.path(), MockProvider::new(48));
        assert_eq!(other_dim.ensure_ready().await.unwrap().dim(), 48);
        assert_eq!(other_dim.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn changed_embedding_model_forces_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "some text")]);
        store(dir.path(), MockProvider::new(32).with_embedding_model("embedder-a"))
            .ensure_ready()
            .await
            .unwrap();

        let same = store(dir.path(), MockProvider::new(32).with_embedding_model("embedder-a"));
        same.ensure_ready().await.unwrap();
        assert_eq!(same.rebuild_count(), 0);

        let other = store(dir.path(), MockProvider::new(32).with_embedding_model("embedder-b"));
        other.ensure_ready().await.unwrap();
        assert_eq!(other.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn loaded_index_with_wrong_dim_is_rebuilt_on_query() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "dimension drift")]);
        store(dir.path(), MockProvider::new(16).with_hidden_dim())
            .ensure_ready()
            .await
            .unwrap();

        let wider = store(dir.path(), MockProvider::new(24).with_hidden_dim());
        assert_eq!(wider.ensure_ready().await.unwrap().dim(), 16);
        assert_eq!(wider.rebuild_count(), 0);

        let hits = wider.retrieve("dimension drift", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "dimension drift");
        assert_eq!(wider.rebuild_count(), 1);
        assert_eq!(wider.current().unwrap().dim(), 24);

        wider.retrieve("dimension", 1).await.unwrap();
        assert_eq!(wider.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn corrupt_pair_triggers_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "some text")]);
        store(dir.path(), MockProvider::new(8))
            .ensure_ready()
            .await
            .unwrap();
        std::fs::write(dir.path().join("state/index.bin"), b"garbage").unwrap();

        let again = store(dir.path(), MockProvider::new(8));
        assert_eq!(again.ensure_ready().await.unwrap().len(), 1);
        assert_eq!(again.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn failed_build_reports_unavailable_and_retries_later() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "text")]);
        let store = store(dir.path(), MockProvider::new(8).failing_embed());

        let err = store.ensure_ready().await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.lifecycle(), Lifecycle::Failed);
        assert!(store.status().last_error.is_some());
        assert!(store.current().is_none());

        store.ensure_ready().await.unwrap_err();
        assert_eq!(store.rebuild_count(), 2);
    }

    #[tokio::test]
    async fn waiters_on_failed_build_do_not_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "text")]);
        let provider = MockProvider::new(8).failing_embed().with_embed_delay(30);
        let store = Arc::new(store(dir.path(), provider));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.ensure_ready().await.is_err() })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(store.rebuild_count(), 1);
    }

    #[tokio::test]
    async fn rebuild_picks_up_new_documents() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "first")]);
        let store = store(dir.path(), MockProvider::new(16));
        assert_eq!(store.ensure_ready().await.unwrap().len(), 1);

        write_corpus(dir.path(), &[("b.txt", "second")]);
        assert_eq!(store.ensure_ready().await.unwrap().len(), 1);
        assert_eq!(store.rebuild().await.unwrap().len(), 2);
        assert_eq!(store.rebuild_count(), 2);
        assert_eq!(store.status().documents, Some(2));
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "first")]);
        let ok = store(dir.path(), MockProvider::new(16));
        ok.ensure_ready().await.unwrap();

        let failing = store(dir.path(), MockProvider::new(16).failing_embed());
        failing.ensure_ready().await.unwrap();
        assert!(failing.rebuild().await.is_err());
        assert_eq!(failing.lifecycle(), Lifecycle::Ready);
        assert_eq!(failing.current().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rebuild_keeps_ready_while_snapshot_serves() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "first")]);
        let store = Arc::new(store(dir.path(), MockProvider::new(16).with_embed_delay(50)));
        store.ensure_ready().await.unwrap();

        let rebuilding = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.rebuild().await.map(|s| s.len()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.rebuild_count(), 2);
        assert_eq!(store.lifecycle(), Lifecycle::Ready);
        assert_eq!(store.current().unwrap().len(), 1);

        assert_eq!(rebuilding.await.unwrap().unwrap(), 1);
        assert_eq!(store.lifecycle(), Lifecycle::Ready);
    }

    #[tokio::test]
    async fn invalidate_removes_persisted_pair() {
        let dir = tempfile::tempdir().unwrap();
        write_corpus(dir.path(), &[("a.txt", "first")]);
        let store = store(dir.path(), MockProvider::new(16));
        store.ensure_ready().await.unwrap();

        store.invalidate().await.unwrap();
        assert_eq!(store.lifecycle(), Lifecycle::Uninitialized);
        assert!(!dir.path().join("state/index.bin").exists());
        store.ensure_ready().await.unwrap();
        assert_eq!(store.rebuild_count(), 2);
    }

    #[tokio::test]
    async fn invalid_chunking_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.chunk_overlap = cfg.chunk_size;
        assert!(RetrievalStore::new(Arc::new(MockProvider::new(4)), cfg).is_err());
    }
}
