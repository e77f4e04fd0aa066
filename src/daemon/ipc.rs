// Inter-process communication via Unix domain sockets with length-prefixed JSON frames

use crate::error::{RagError, Result};
use crate::ingest::QueueStats;
use crate::query::Source;
use crate::storage::StoreStats;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// Maximum frame size (10MB)
const MAX_FRAME_SIZE: u32 = 10 * 1024 * 1024;

/// Requests sent from the CLI (or any client) to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcMessage {
    /// Queue an article for background ingestion
    Ingest {
        title: String,
        content: String,
        url: String,
    },
    /// Answer a question; replies are streamed
    Query {
        question: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top_k: Option<usize>,
    },
    Health,
    Stats,
    /// Request daemon to stop
    Stop,
}

/// Liveness report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub embedding_loaded: bool,
    pub embedding_model: String,
    pub generation_reachable: bool,
    pub generation_model: String,
}

/// Store and queue statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsReport {
    /// Absent until the index has been initialised
    #[serde(default)]
    pub store: Option<StoreStats>,
    pub queue: QueueStats,
    pub database_bytes: u64,
}

/// Frames sent from the daemon back to the client.
///
/// A query is answered by zero or more `Token` frames followed by exactly
/// one `Sources` or `Error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IpcResponse {
    Accepted { job_id: String, message: String },
    Token { text: String },
    Sources { sources: Vec<Source> },
    Health(HealthReport),
    Stats(StatsReport),
    Ok { message: String },
    Error {
        code: u16,
        message: String,
        retryable: bool,
    },
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self::Ok {
            message: message.into(),
        }
    }

    /// Error frame carrying the caller-facing message and status code
    pub fn error(err: &RagError) -> Self {
        Self::Error {
            code: err.status_code(),
            message: err.user_message(),
            retryable: err.retryable(),
        }
    }

    /// Turn an `Error` frame back into an error; other frames pass through
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error { code, message, .. } => Err(RagError::Remote { code, message }),
            other => Ok(other),
        }
    }
}

/// Unix domain socket server for IPC
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            listener: None,
        }
    }

    /// Bind to the socket path and start listening
    pub async fn bind(&mut self) -> Result<()> {
        // Remove stale socket file left by a crashed daemon
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to remove existing socket: {:?}", self.socket_path),
            })?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create socket directory: {:?}", parent),
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| RagError::Io {
            source: e,
            context: format!("Failed to bind to socket: {:?}", self.socket_path),
        })?;

        self.listener = Some(listener);

        tracing::info!("IPC server listening on {:?}", self.socket_path);
        Ok(())
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<UnixStream> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| RagError::Daemon("Server not bound".to_string()))?;

        let (stream, _addr) = listener.accept().await.map_err(|e| RagError::Io {
            source: e,
            context: "Failed to accept connection".to_string(),
        })?;

        Ok(stream)
    }

    /// Shutdown the server and clean up socket file
    pub fn shutdown(&self) -> Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to remove socket: {:?}", self.socket_path),
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Read one length-prefixed JSON frame
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let length = reader.read_u32().await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to read frame length".to_string(),
    })?;

    if length > MAX_FRAME_SIZE {
        return Err(RagError::Daemon(format!(
            "Frame too large: {} bytes (max: {})",
            length, MAX_FRAME_SIZE
        )));
    }

    let mut buffer = vec![0u8; length as usize];
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| RagError::Io {
            source: e,
            context: "Failed to read frame payload".to_string(),
        })?;

    serde_json::from_slice(&buffer).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to deserialize IPC frame".to_string(),
    })
}

/// Write one length-prefixed JSON frame (4-byte big-endian length)
pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(frame).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize IPC frame".to_string(),
    })?;

    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(RagError::Daemon(format!(
            "Frame too large: {} bytes (max: {})",
            payload.len(),
            MAX_FRAME_SIZE
        )));
    }

    writer
        .write_u32(payload.len() as u32)
        .await
        .map_err(|e| RagError::Io {
            source: e,
            context: "Failed to write frame length".to_string(),
        })?;

    writer.write_all(&payload).await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to write frame payload".to_string(),
    })?;

    writer.flush().await.map_err(|e| RagError::Io {
        source: e,
        context: "Failed to flush frame".to_string(),
    })?;

    Ok(())
}

/// IPC client for talking to the daemon
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused => {
                    RagError::DaemonNotRunning
                }
                _ => RagError::Io {
                    source: e,
                    context: format!("Failed to connect to daemon at {:?}", self.socket_path),
                },
            })
    }

    /// Send a request that is answered with a single frame
    pub async fn send(&self, message: &IpcMessage) -> Result<IpcResponse> {
        let mut stream = self.connect().await?;
        write_frame(&mut stream, message).await?;
        read_frame(&mut stream).await
    }

    /// Ask a question, calling `on_token` for each answer token as it
    /// arrives. Returns the sources once the answer is complete.
    pub async fn ask<F>(&self, question: &str, top_k: Option<usize>, mut on_token: F) -> Result<Vec<Source>>
    where
        F: FnMut(&str),
    {
        let mut stream = self.connect().await?;
        write_frame(
            &mut stream,
            &IpcMessage::Query {
                question: question.to_string(),
                top_k,
            },
        )
        .await?;

        loop {
            let frame: IpcResponse = read_frame(&mut stream).await?;
            match frame.into_result()? {
                IpcResponse::Token { text } => on_token(&text),
                IpcResponse::Sources { sources } => return Ok(sources),
                other => {
                    return Err(RagError::Daemon(format!(
                        "Unexpected frame in answer stream: {:?}",
                        other
                    )))
                }
            }
        }
    }
}
