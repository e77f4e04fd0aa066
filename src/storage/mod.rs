//! Storage layer for newsrag
//!
//! SQLite connection pool plus the vector store built on top of it

pub mod database;
pub mod vector_store;

use crate::config::Config;
use crate::error::{Result, RagError};
use std::path::Path;

pub use database::{Database, DbPool};
pub use vector_store::{
    cosine_similarity, EmbeddedRecord, RecordMetadata, ScoredRecord, SqliteVectorStore,
    StoreStats, VectorStore, DISTANCE_METRIC,
};

/// Open the configured vector store, creating the database on first use
pub fn open_vector_store(config: &Config) -> Result<SqliteVectorStore> {
    let db_path = config.db_path();
    let database = Database::new(&db_path)?;

    tracing::info!("Vector store at {}", db_path.display());

    SqliteVectorStore::open(database, config.embedding.dimension, &config.embedding.model)
}

/// Size in bytes of the database file plus its WAL and shared-memory files
pub fn database_size(db_path: &Path) -> Result<u64> {
    let mut size = 0u64;

    for suffix in ["", "-wal", "-shm"] {
        let path = db_path.with_file_name(format!(
            "{}{}",
            db_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            suffix
        ));

        match std::fs::metadata(&path) {
            Ok(meta) => size += meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RagError::Io {
                    source: e,
                    context: format!("Failed to get file metadata: {}", path.display()),
                })
            }
        }
    }

    Ok(size)
}

/// Format size as human-readable string
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}
