//! Deterministic test doubles shared by the integration tests
#![allow(dead_code)]

use futures::future::{BoxFuture, FutureExt};
use futures::stream::StreamExt;
use newsrag::embedding::{EmbeddingError, EmbeddingProvider};
use newsrag::error::Result;
use newsrag::generation::{GenerationError, GenerationService, TokenStream};
use newsrag::index::{Index, LazyIndex};
use newsrag::storage::{
    Database, EmbeddedRecord, ScoredRecord, SqliteVectorStore, StoreStats, VectorStore,
};
use newsrag::RagError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const DIMENSION: usize = 64;

/// Bag-of-words embedder: each lowercase word bumps one hashed bucket
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DIMENSION,
        }
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = blake3::hash(word.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            let bucket = u64::from_le_bytes(bytes) as usize % self.dimension;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Succeeds for the first `ok_calls` embeddings, then reports the model unavailable
pub struct FailingEmbedder {
    inner: HashEmbedder,
    ok_calls: usize,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn after(ok_calls: usize) -> Self {
        Self {
            inner: HashEmbedder::new(),
            ok_calls,
            calls: AtomicUsize::new(0),
        }
    }
}

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            return Err(EmbeddingError::Unavailable("model unloaded".to_string()));
        }
        self.inner.embed(text)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        "hash-bow"
    }
}

/// Store whose inserts fail after `ok_inserts`; reads go to the inner store
pub struct FailingStore {
    inner: Arc<dyn VectorStore>,
    ok_inserts: usize,
    inserts: AtomicUsize,
}

impl FailingStore {
    pub fn after(inner: Arc<dyn VectorStore>, ok_inserts: usize) -> Self {
        Self {
            inner,
            ok_inserts,
            inserts: AtomicUsize::new(0),
        }
    }
}

impl VectorStore for FailingStore {
    fn insert(&self, record: &EmbeddedRecord) -> Result<()> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.ok_inserts {
            return Err(RagError::StoreUnavailable("disk full".to_string()));
        }
        self.inner.insert(record)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        self.inner.search(query, k)
    }

    fn len(&self) -> Result<usize> {
        self.inner.len()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn stats(&self) -> Result<StoreStats> {
        self.inner.stats()
    }
}

/// Generation double replaying a fixed token script
pub struct ScriptedGenerator {
    tokens: Vec<String>,
    fail_after: Option<usize>,
    fail_on_start: bool,
    reachable: bool,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fail_after: None,
            fail_on_start: false,
            reachable: true,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Emit `n` tokens, then a terminal upstream error
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Reject the request before any token
    pub fn rejecting(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    pub fn answer(&self) -> String {
        self.tokens.concat()
    }
}

impl GenerationService for ScriptedGenerator {
    fn generate(&self, prompt: &str) -> BoxFuture<'_, std::result::Result<TokenStream, GenerationError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let result = if self.fail_on_start {
            Err(GenerationError::Status {
                status: 500,
                body: "internal error".to_string(),
            })
        } else {
            let mut items: Vec<std::result::Result<String, GenerationError>> =
                self.tokens.iter().cloned().map(Ok).collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(GenerationError::Upstream("model crashed".to_string())));
            }
            Ok(futures::stream::iter(items).boxed())
        };

        futures::future::ready(result).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, std::result::Result<(), GenerationError>> {
        let result = if self.reachable {
            Ok(())
        } else {
            Err(GenerationError::Transport("connection refused".to_string()))
        };
        futures::future::ready(result).boxed()
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Sets a flag when dropped
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Generation double producing tokens forever, one per millisecond.
/// `dropped` turns true once the token stream is released.
pub struct EndlessGenerator {
    pub produced: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
}

impl EndlessGenerator {
    pub fn new() -> Self {
        Self {
            produced: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl GenerationService for EndlessGenerator {
    fn generate(&self, _prompt: &str) -> BoxFuture<'_, std::result::Result<TokenStream, GenerationError>> {
        let produced = Arc::clone(&self.produced);
        let guard = DropFlag(Arc::clone(&self.dropped));

        let stream = futures::stream::unfold((produced, guard), |(produced, guard)| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let n = produced.fetch_add(1, Ordering::SeqCst);
            Some((Ok(format!("w{} ", n)), (produced, guard)))
        })
        .boxed();

        futures::future::ready(Ok(stream as TokenStream)).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, std::result::Result<(), GenerationError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn model(&self) -> &str {
        "endless"
    }
}

/// Generation double whose stream never yields, like a long prompt prefill.
/// `started` turns true on the first request; `dropped` once the stream is released.
pub struct StalledGenerator {
    pub started: Arc<AtomicBool>,
    pub dropped: Arc<AtomicBool>,
}

impl StalledGenerator {
    pub fn new() -> Self {
        Self {
            started: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl GenerationService for StalledGenerator {
    fn generate(&self, _prompt: &str) -> BoxFuture<'_, std::result::Result<TokenStream, GenerationError>> {
        self.started.store(true, Ordering::SeqCst);
        let guard = DropFlag(Arc::clone(&self.dropped));

        let stream = futures::stream::unfold(guard, |guard| async move {
            futures::future::pending::<()>().await;
            Some((Ok::<String, GenerationError>(String::new()), guard))
        })
        .boxed();

        futures::future::ready(Ok(stream as TokenStream)).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, std::result::Result<(), GenerationError>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn model(&self) -> &str {
        "stalled"
    }
}

pub fn sqlite_store(temp: &TempDir) -> Arc<dyn VectorStore> {
    let db = Database::new(&temp.path().join("vectors.sqlite")).unwrap();
    Arc::new(SqliteVectorStore::open(db, DIMENSION, "hash-bow").unwrap())
}

pub fn ready_index(
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
) -> Arc<LazyIndex> {
    Arc::new(LazyIndex::ready(Index::new(embedder, store).unwrap()))
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn article(words: usize, topic: &str) -> String {
    (0..words)
        .map(|i| format!("{}{}", topic, i % 7))
        .collect::<Vec<_>>()
        .join(" ")
}
