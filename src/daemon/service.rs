// Request handling: one request per connection, query answers streamed back

use super::ipc::{self, HealthReport, IpcMessage, IpcResponse, IpcServer, StatsReport};
use crate::error::{RagError, Result};
use crate::index::LazyIndex;
use crate::ingest::{Document, IngestQueue};
use crate::query::QueryPipeline;
use crate::storage;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::{Notify, Semaphore};

/// How long a client may take to send its request by default
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection handler needs, shared across connections
pub struct RagService {
    index: Arc<LazyIndex>,
    queue: IngestQueue,
    query: QueryPipeline,
    embedding_model: String,
    db_path: PathBuf,
    request_timeout: Duration,
    stop: Notify,
}

impl RagService {
    pub fn new(
        index: Arc<LazyIndex>,
        queue: IngestQueue,
        query: QueryPipeline,
        embedding_model: impl Into<String>,
        db_path: PathBuf,
    ) -> Self {
        Self {
            index,
            queue,
            query,
            embedding_model: embedding_model.into(),
            db_path,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop: Notify::new(),
        }
    }

    /// Drop connections that send no request within `timeout`
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &IngestQueue {
        &self.queue
    }

    /// Liveness report; never initialises the index
    pub async fn health(&self) -> HealthReport {
        let embedding_loaded = self.index.is_ready();

        let generation_reachable = match self.query.generator().ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Generation service probe failed: {}", e);
                false
            }
        };

        let status = if embedding_loaded && generation_reachable {
            "ok"
        } else {
            "degraded"
        };

        HealthReport {
            status: status.to_string(),
            embedding_loaded,
            embedding_model: self.embedding_model.clone(),
            generation_reachable,
            generation_model: self.query.generator().model().to_string(),
        }
    }

    pub async fn stats(&self) -> Result<StatsReport> {
        let store = match self.index.get() {
            Some(index) => Some(index.stats().await?),
            None => None,
        };

        Ok(StatsReport {
            store,
            queue: self.queue.stats(),
            database_bytes: storage::database_size(&self.db_path)?,
        })
    }

    /// Ask the serve loop to stop
    pub fn request_stop(&self) {
        self.stop.notify_one();
    }

    async fn stopped(&self) {
        self.stop.notified().await
    }

    /// Stop accepting ingestion and wait for queued jobs
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }

    /// Serve one request on `stream`
    pub async fn handle_connection(&self, mut stream: UnixStream) -> Result<()> {
        let read = tokio::time::timeout(
            self.request_timeout,
            ipc::read_frame::<_, IpcMessage>(&mut stream),
        )
        .await;
        let message = match read {
            Ok(Ok(message)) => message,
            Ok(Err(RagError::Json { source, .. })) => {
                tracing::warn!("Malformed request frame: {}", source);
                let err = RagError::InvalidInput(format!("Malformed request: {}", source));
                return ipc::write_frame(&mut stream, &IpcResponse::error(&err)).await;
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::debug!("No request within {:?}, closing connection", self.request_timeout);
                return Ok(());
            }
        };

        match message {
            IpcMessage::Ingest {
                title,
                content,
                url,
            } => {
                let response = match self.queue.submit(Document::new(title, url, content)) {
                    Ok(ticket) => IpcResponse::Accepted {
                        job_id: ticket.job_id.to_string(),
                        message: "Article queued for ingestion".to_string(),
                    },
                    Err(e) => {
                        tracing::warn!("Rejected ingestion: {}", e);
                        IpcResponse::error(&e)
                    }
                };
                ipc::write_frame(&mut stream, &response).await
            }
            IpcMessage::Query { question, top_k } => {
                self.answer(&mut stream, &question, top_k).await
            }
            IpcMessage::Health => {
                let report = self.health().await;
                ipc::write_frame(&mut stream, &IpcResponse::Health(report)).await
            }
            IpcMessage::Stats => {
                let response = match self.stats().await {
                    Ok(report) => IpcResponse::Stats(report),
                    Err(e) => IpcResponse::error(&e),
                };
                ipc::write_frame(&mut stream, &response).await
            }
            IpcMessage::Stop => {
                ipc::write_frame(&mut stream, &IpcResponse::ok("Shutdown initiated")).await?;
                self.request_stop();
                Ok(())
            }
        }
    }

    async fn answer(&self, stream: &mut UnixStream, question: &str, top_k: Option<usize>) -> Result<()> {
        let k = top_k.unwrap_or_else(|| self.query.top_k());

        let mut answer = match self.query.query_with_k(question, k).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Query failed: {}", e);
                return ipc::write_frame(stream, &IpcResponse::error(&e)).await;
            }
        };

        // Clients send nothing after the request; EOF or a read error means they left
        let (mut reader, mut writer) = stream.split();
        let mut scratch = [0u8; 64];

        loop {
            let token = tokio::select! {
                token = answer.next_token() => token,
                read = reader.read(&mut scratch) => match read {
                    Ok(n) if n > 0 => continue,
                    _ => {
                        // Dropping `answer` on return stops the generation stream
                        tracing::debug!("Client went away while waiting for tokens");
                        return Ok(());
                    }
                },
            };

            let frame = match token {
                Some(Ok(text)) => IpcResponse::Token { text },
                Some(Err(e)) => {
                    // Tokens already sent stand; the error closes the answer
                    return ipc::write_frame(&mut writer, &IpcResponse::error(&e)).await;
                }
                None => break,
            };

            if let Err(e) = ipc::write_frame(&mut writer, &frame).await {
                tracing::debug!("Client went away mid-answer: {}", e);
                return Ok(());
            }
        }

        let sources = answer.sources().to_vec();
        tracing::info!("Answered query with {} sources", sources.len());
        ipc::write_frame(&mut writer, &IpcResponse::Sources { sources }).await
    }
}

/// Accept connections until `shutdown` resolves or a client sends `stop`.
///
/// At most `max_connections` requests are handled at once; extra clients get
/// a retryable error frame.
pub async fn serve<F>(
    server: &IpcServer,
    service: Arc<RagService>,
    max_connections: usize,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let permits = Arc::new(Semaphore::new(max_connections.max(1)));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = server.accept() => {
                let mut stream = match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("Accept failed: {}", e);
                        continue;
                    }
                };

                let permit = match Arc::clone(&permits).try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("Connection limit ({}) reached, rejecting client", max_connections);
                        let _ = ipc::write_frame(&mut stream, &IpcResponse::Error {
                            code: 503,
                            message: "Too many concurrent requests, retry later".to_string(),
                            retryable: true,
                        }).await;
                        continue;
                    }
                };

                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = service.handle_connection(stream).await {
                        tracing::error!("Client handler error: {}", e);
                    }
                });
            }

            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }

            _ = service.stopped() => {
                tracing::info!("Stop requested over IPC");
                break;
            }
        }
    }

    Ok(())
}
