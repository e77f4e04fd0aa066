//! Process-wide index handle: the embedding model plus the vector store
//!
//! Both are expensive to bring up (model download and ONNX session, database
//! migrations), so they are built once, on first use, and shared afterwards.

use crate::config::Config;
use crate::embedding::{EmbeddingProvider, FastEmbedProvider};
use crate::error::{Result, RagError};
use crate::storage::{self, EmbeddedRecord, ScoredRecord, StoreStats, VectorStore};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Live handle over the embedder and the vector store
pub struct Index {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Index {
    /// Pair an embedder with a store; their dimensions must agree
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(RagError::Config(format!(
                "Embedding model '{}' produces {}-dimensional vectors but the store holds {}",
                embedder.model_name(),
                embedder.dimension(),
                store.dimension()
            )));
        }

        Ok(Self { embedder, store })
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed one text on the blocking pool
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        blocking(move || embedder.embed(&text).map_err(RagError::from)).await
    }

    pub async fn insert(&self, record: EmbeddedRecord) -> Result<()> {
        let store = Arc::clone(&self.store);
        blocking(move || store.insert(&record)).await
    }

    pub async fn search(&self, vector: Vec<f32>, k: usize) -> Result<Vec<ScoredRecord>> {
        let store = Arc::clone(&self.store);
        blocking(move || store.search(&vector, k)).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let store = Arc::clone(&self.store);
        blocking(move || store.stats()).await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Blocking task failed: {}", e)))?
}

type IndexFactory = Arc<dyn Fn() -> Result<Index> + Send + Sync>;

/// Lazily-initialised [`Index`].
///
/// The first caller of [`LazyIndex::get_index`] runs the factory; concurrent
/// first callers wait on that single run and all observe the same handle.
/// A failed initialisation leaves the cell empty so a later call can retry.
pub struct LazyIndex {
    cell: OnceCell<Arc<Index>>,
    factory: IndexFactory,
}

impl LazyIndex {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Index> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Arc::new(factory),
        }
    }

    /// Already-initialised handle
    pub fn ready(index: Index) -> Self {
        Self {
            cell: OnceCell::new_with(Some(Arc::new(index))),
            factory: Arc::new(|| Err(RagError::Config("Index already initialised".to_string()))),
        }
    }

    /// FastEmbed model plus the SQLite store named by the configuration
    pub fn from_config(config: &Config) -> Self {
        let config = config.clone();

        Self::new(move || {
            let provider = FastEmbedProvider::new(&config.embedding.model)?;
            if provider.dimension() != config.embedding.dimension {
                return Err(RagError::Config(format!(
                    "embedding.dimension is {} but model '{}' produces {}",
                    config.embedding.dimension,
                    config.embedding.model,
                    provider.dimension()
                )));
            }

            let store = storage::open_vector_store(&config)?;

            Index::new(Arc::new(provider), Arc::new(store))
        })
    }

    /// The shared handle, initialising it on first use
    pub async fn get_index(&self) -> Result<Arc<Index>> {
        let index = self
            .cell
            .get_or_try_init(|| async {
                tracing::info!("Initialising index");
                let started = std::time::Instant::now();

                let factory = Arc::clone(&self.factory);
                let index = blocking(move || factory()).await?;

                tracing::info!(
                    "Index ready: model={}, dimension={} ({:?})",
                    index.model_name(),
                    index.embedder().dimension(),
                    started.elapsed()
                );
                Ok::<_, RagError>(Arc::new(index))
            })
            .await?;

        Ok(Arc::clone(index))
    }

    /// Handle if already initialised; never triggers initialisation
    pub fn get(&self) -> Option<Arc<Index>> {
        self.cell.get().cloned()
    }

    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }
}
