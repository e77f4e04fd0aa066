use std::path::PathBuf;
use thiserror::Error;

/// Main error type for newsrag
#[derive(Error, Debug)]
pub enum RagError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Chunk size / overlap combination that cannot produce a window walk
    #[error("Chunking error: {0}")]
    Chunking(String),

    /// Embedding model is not loaded or cannot be loaded
    #[error("Embedding model unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Embedding model is loaded but rejected the input
    #[error("Embedding failed: {0}")]
    Embedding(String),

    /// Vector store connection or storage failure
    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    /// Generation service returned a non-success status or a broken stream
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Generation service did not answer within the configured bound
    #[error("Generation timed out after {secs}s")]
    GenerationTimeout { secs: u64 },

    /// Background ingestion queue has no free slot
    #[error("Ingestion queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// Caller supplied something unusable (empty question, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Daemon errors
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// Error reported by the daemon over IPC
    #[error("{message} (status {code})")]
    Remote { code: u16, message: String },

    /// Daemon not running
    #[error("Daemon is not running")]
    DaemonNotRunning,

    /// Daemon already running
    #[error("Daemon is already running (PID: {pid})")]
    DaemonAlreadyRunning { pid: u32 },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// HTTP-equivalent status code reported to callers of the service.
    pub fn status_code(&self) -> u16 {
        match self {
            RagError::InvalidInput(_) => 400,
            RagError::EmbeddingUnavailable(_) | RagError::StoreUnavailable(_) => 503,
            RagError::Database(_) | RagError::QueueFull { .. } => 503,
            RagError::Generation(_) => 502,
            RagError::GenerationTimeout { .. } => 504,
            RagError::Remote { code, .. } => *code,
            _ => 500,
        }
    }

    /// Whether resubmitting the same request later may succeed.
    pub fn retryable(&self) -> bool {
        matches!(self.status_code(), 503 | 504)
    }

    /// Message shown to the caller at the service boundary.
    pub fn user_message(&self) -> String {
        match self {
            RagError::EmbeddingUnavailable(_) => {
                "Embedding model not loaded yet, try again shortly".to_string()
            }
            RagError::StoreUnavailable(_) | RagError::Database(_) => {
                "Vector store unavailable".to_string()
            }
            RagError::GenerationTimeout { secs } => {
                format!("Generation service did not answer within {}s", secs)
            }
            RagError::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for newsrag operations
pub type Result<T> = std::result::Result<T, RagError>;
