//! Text generation service boundary
//!
//! The query pipeline only needs "prompt in, ordered token stream out";
//! [`OllamaClient`] is the HTTP implementation used by the daemon.

mod ollama;

pub use ollama::{LineDecoder, OllamaClient};

use crate::error::RagError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generation service did not respond within {secs}s")]
    Timeout { secs: u64 },

    #[error("Cannot reach generation service: {0}")]
    Transport(String),

    #[error("Malformed generation response: {0}")]
    Decode(String),

    #[error("Generation service reported an error: {0}")]
    Upstream(String),
}

impl From<GenerationError> for RagError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Timeout { secs } => RagError::GenerationTimeout { secs },
            other => RagError::Generation(other.to_string()),
        }
    }
}

/// Ordered answer tokens. Dropping the stream releases the upstream connection.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

/// Token-streaming text generation
pub trait GenerationService: Send + Sync {
    /// Start generating for `prompt`. Resolves once the service has accepted
    /// the request; tokens then arrive on the returned stream in order.
    fn generate(&self, prompt: &str) -> BoxFuture<'_, Result<TokenStream, GenerationError>>;

    /// Cheap reachability probe
    fn ping(&self) -> BoxFuture<'_, Result<(), GenerationError>>;

    /// Model identifier requests are sent with
    fn model(&self) -> &str;
}
