//! newsrag - Retrieval-augmented question answering over news articles
//!
//! Articles are split into overlapping chunks, embedded with a local model and
//! stored in SQLite. Questions are answered by retrieving the closest chunks
//! and streaming a grounded answer from an Ollama model, served to the CLI by
//! a background daemon over a Unix socket.

pub mod chunker;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod query;
pub mod storage;

pub use error::{RagError, Result};
