//! Embedding capability boundary
//!
//! - `EmbeddingProvider` trait: text -> fixed-dimension vector
//! - `FastEmbedProvider`: local ONNX model via fastembed (all-MiniLM-L6-v2, 384-dim)

mod provider;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::error::RagError;

impl From<EmbeddingError> for RagError {
    fn from(e: EmbeddingError) -> Self {
        match e {
            EmbeddingError::Unavailable(msg) | EmbeddingError::InitializationError(msg) => {
                RagError::EmbeddingUnavailable(msg)
            }
            other => RagError::Embedding(other.to_string()),
        }
    }
}
