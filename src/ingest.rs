//! Document ingestion: chunk, embed, store
//!
//! [`IngestionPipeline`] does the work for one document. [`IngestQueue`]
//! runs it in the background so the accepting caller never waits on it.

use crate::chunker::Chunker;
use crate::config::IngestionConfig;
use crate::error::{Result, RagError};
use crate::index::LazyIndex;
use crate::storage::{EmbeddedRecord, RecordMetadata};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A news article submitted for indexing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub url: String,
    pub content: String,
}

impl Document {
    pub fn new(title: impl Into<String>, url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }
}

/// Chunks a document and stores one embedded record per chunk
pub struct IngestionPipeline {
    index: Arc<LazyIndex>,
    chunker: Chunker,
}

impl IngestionPipeline {
    pub fn new(index: Arc<LazyIndex>, chunker: Chunker) -> Self {
        Self { index, chunker }
    }

    /// Ingest one document, returning the number of chunks stored.
    ///
    /// Chunks are embedded and inserted one at a time. If a chunk fails, the
    /// chunks already inserted stay in the store and the error is returned
    /// for the whole document; re-ingesting is the recovery path.
    pub async fn ingest(&self, document: &Document) -> Result<usize> {
        let chunks = self
            .chunker
            .split(&document.content, &document.title, &document.url);

        if chunks.is_empty() {
            tracing::debug!("Document '{}' has no content, nothing stored", document.title);
            return Ok(0);
        }

        let index = self.index.get_index().await?;
        let total = chunks.len();
        let mut stored = 0;

        for chunk in chunks {
            let position = chunk.position;

            let result = async {
                let vector = index.embed(&chunk.text).await?;
                index
                    .insert(EmbeddedRecord {
                        vector,
                        text: chunk.text,
                        metadata: RecordMetadata {
                            title: chunk.source_title,
                            url: chunk.source_url,
                        },
                        position,
                    })
                    .await
            }
            .await;

            if let Err(e) = result {
                tracing::warn!(
                    "Ingestion of '{}' failed at chunk {}/{} ({} already stored): {}",
                    document.title,
                    position + 1,
                    total,
                    stored,
                    e
                );
                return Err(e);
            }

            stored += 1;
            tracing::debug!("Stored chunk {}/{} of '{}'", stored, total, document.title);
        }

        Ok(stored)
    }
}

/// Handle returned when a document is accepted for background ingestion.
///
/// Dropping it is fine; the job still runs and its outcome is logged.
#[derive(Debug)]
pub struct IngestTicket {
    pub job_id: Uuid,
    pub completion: oneshot::Receiver<Result<usize>>,
}

struct IngestJob {
    job_id: Uuid,
    document: Document,
    completion: oneshot::Sender<Result<usize>>,
}

/// Counters for the background queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Bounded background ingestion queue.
///
/// A dispatcher task pulls jobs off the queue and runs at most
/// `max_concurrent` of them at a time.
pub struct IngestQueue {
    sender: Mutex<Option<mpsc::Sender<IngestJob>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl IngestQueue {
    /// Start the dispatcher; must be called inside a tokio runtime
    pub fn start(pipeline: Arc<IngestionPipeline>, config: &IngestionConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let max_concurrent = config.max_concurrent.max(1);

        let (sender, receiver) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());

        let dispatcher = tokio::spawn(dispatch(
            receiver,
            pipeline,
            max_concurrent,
            Arc::clone(&counters),
        ));

        tracing::info!(
            "Ingestion queue started (capacity {}, {} concurrent)",
            capacity,
            max_concurrent
        );

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
            capacity,
        }
    }

    /// Accept a document without waiting for it to be processed.
    ///
    /// Fails immediately when the queue is full or shut down.
    pub fn submit(&self, document: Document) -> Result<IngestTicket> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| RagError::Daemon("Ingestion queue lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| RagError::Daemon("Ingestion queue is shut down".to_string()))?;

        let job_id = Uuid::new_v4();
        let (completion_tx, completion_rx) = oneshot::channel();

        sender
            .try_send(IngestJob {
                job_id,
                document,
                completion: completion_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => RagError::QueueFull {
                    capacity: self.capacity,
                },
                mpsc::error::TrySendError::Closed(_) => {
                    RagError::Daemon("Ingestion queue is shut down".to_string())
                }
            })?;

        tracing::debug!("Queued ingestion job {}", job_id);

        Ok(IngestTicket {
            job_id,
            completion: completion_rx,
        })
    }

    pub fn stats(&self) -> QueueStats {
        let queued = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|s| self.capacity - s.capacity()))
            .unwrap_or(0);

        QueueStats {
            queued,
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting work and wait for queued and running jobs to finish
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);

        let dispatcher = self.dispatcher.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = dispatcher {
            tracing::info!("Waiting for ingestion queue to drain...");
            if let Err(e) = handle.await {
                tracing::error!("Ingestion dispatcher panicked: {}", e);
            }
            let stats = self.stats();
            tracing::info!(
                "Ingestion queue drained: {} completed, {} failed",
                stats.completed,
                stats.failed
            );
        }
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<IngestJob>,
    pipeline: Arc<IngestionPipeline>,
    max_concurrent: usize,
    counters: Arc<Counters>,
) {
    let permits = Arc::new(Semaphore::new(max_concurrent));

    while let Some(job) = receiver.recv().await {
        let permit = match Arc::clone(&permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let pipeline = Arc::clone(&pipeline);
        let counters = Arc::clone(&counters);

        tokio::spawn(async move {
            let _permit = permit;
            run_job(&pipeline, job, &counters).await;
        });
    }

    // Every permit back means every spawned job has finished
    if permits.acquire_many(max_concurrent as u32).await.is_err() {
        tracing::warn!("Ingestion permits closed before drain completed");
    }
}

async fn run_job(pipeline: &IngestionPipeline, job: IngestJob, counters: &Counters) {
    let IngestJob {
        job_id,
        document,
        completion,
    } = job;

    tracing::info!("Ingestion job {} started: '{}' ({})", job_id, document.title, document.url);

    let result = pipeline.ingest(&document).await;

    match &result {
        Ok(chunks) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                "Ingestion job {} finished: '{}' stored as {} chunks",
                job_id,
                document.title,
                chunks
            );
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!("Ingestion job {} failed for '{}': {}", job_id, document.title, e);
        }
    }

    // Receiver may have been dropped (fire-and-forget caller)
    let _ = completion.send(result);
}
