//! Append-only vector store with exact cosine nearest-neighbour search

use super::Database;
use crate::error::{Result, RagError};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// The only distance metric the store understands. Recorded at creation and
/// checked on every open.
pub const DISTANCE_METRIC: &str = "cosine";

/// Source metadata shared by every chunk of one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub title: String,
    pub url: String,
}

/// A persisted chunk: vector, text and source metadata
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedRecord {
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: RecordMetadata,
    /// Chunk position within its source document
    pub position: usize,
}

/// One search hit
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: i64,
    pub record: EmbeddedRecord,
    /// Cosine similarity clamped to [0, 1]; 1 means identical direction
    pub score: f32,
}

/// Store-level statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub document_count: usize,
    pub duplicate_chunks: usize,
    pub dimension: usize,
    pub metric: String,
    pub embedding_model: String,
}

/// Persistence contract for embedded chunks.
///
/// Each `insert` is atomic; concurrent callers are serialised by the backing
/// store, not by the caller.
pub trait VectorStore: Send + Sync {
    /// Persist one record
    fn insert(&self, record: &EmbeddedRecord) -> Result<()>;

    /// At most `k` records ordered by descending similarity; ties keep
    /// insertion order. An empty store yields an empty result.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>>;

    /// Number of stored records
    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Vector dimension accepted by this store
    fn dimension(&self) -> usize;

    fn stats(&self) -> Result<StoreStats>;
}

/// SQLite-backed vector store
pub struct SqliteVectorStore {
    database: Database,
    dimension: usize,
    embedding_model: String,
}

impl SqliteVectorStore {
    /// Open the store, recording metric, dimension and model on first use.
    ///
    /// Reopening with a different dimension or model, or a store built
    /// with another metric, is refused.
    pub fn open(database: Database, dimension: usize, embedding_model: &str) -> Result<Self> {
        let store = Self {
            database,
            dimension,
            embedding_model: embedding_model.to_string(),
        };

        store.ensure_meta("distance_metric", DISTANCE_METRIC)?;
        store.ensure_meta("dimension", &dimension.to_string())?;
        store.ensure_meta("embedding_model", embedding_model)?;

        tracing::debug!(
            "Vector store open: metric={}, dimension={}, model={}",
            DISTANCE_METRIC,
            dimension,
            embedding_model
        );

        Ok(store)
    }

    fn ensure_meta(&self, key: &str, expected: &str) -> Result<()> {
        let conn = self.database.get_conn()?;

        conn.execute(
            "INSERT OR IGNORE INTO _store_meta (key, value) VALUES (?1, ?2)",
            params![key, expected],
        )?;

        let stored: String = conn.query_row(
            "SELECT value FROM _store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;

        if stored != expected {
            return Err(RagError::Config(format!(
                "Vector store was created with {} = '{}', but '{}' is configured",
                key, stored, expected
            )));
        }

        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::InvalidInput(format!(
                "Vector dimension {} does not match store dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn load_record(&self, id: i64) -> Result<Option<EmbeddedRecord>> {
        let conn = self.database.get_conn()?;

        let row = conn
            .query_row(
                "SELECT title, url, content, position, embedding FROM news_chunks WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(title, url, text, position, blob)| {
            Ok(EmbeddedRecord {
                vector: decode_vector(&blob)?,
                text,
                metadata: RecordMetadata { title, url },
                position: position as usize,
            })
        })
        .transpose()
    }
}

impl VectorStore for SqliteVectorStore {
    fn insert(&self, record: &EmbeddedRecord) -> Result<()> {
        self.check_dimension(&record.vector)?;

        let conn = self.database.get_conn()?;
        let content_hash = blake3::hash(record.text.as_bytes()).to_hex().to_string();

        conn.execute(
            "INSERT INTO news_chunks
                (title, url, content, content_hash, position, embedding, dimension, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &record.metadata.title,
                &record.metadata.url,
                &record.text,
                &content_hash,
                record.position as i64,
                encode_vector(&record.vector),
                self.dimension as i64,
                chrono::Utc::now().timestamp(),
            ],
        )?;

        tracing::trace!(
            "Inserted chunk {} of '{}' ({} chars)",
            record.position,
            record.metadata.title,
            record.text.len()
        );

        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredRecord>> {
        self.check_dimension(query)?;

        if k == 0 {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(i64, f32)> = {
            let conn = self.database.get_conn()?;
            let mut stmt = conn.prepare("SELECT id, embedding FROM news_chunks ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut ranked = Vec::new();
            for row in rows {
                let (id, blob) = row?;
                let vector = decode_vector(&blob)?;
                ranked.push((id, cosine_similarity(query, &vector)));
            }
            ranked
        };

        // Stable sort: equal similarities stay in id (insertion) order
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked.truncate(k);

        let mut results = Vec::with_capacity(ranked.len());
        for (id, similarity) in ranked {
            if let Some(record) = self.load_record(id)? {
                results.push(ScoredRecord {
                    id,
                    record,
                    score: similarity.clamp(0.0, 1.0),
                });
            }
        }

        Ok(results)
    }

    fn len(&self) -> Result<usize> {
        let conn = self.database.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM news_chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn stats(&self) -> Result<StoreStats> {
        let conn = self.database.get_conn()?;

        let (chunk_count, document_count, distinct_hashes): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT url), COUNT(DISTINCT content_hash) FROM news_chunks",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(StoreStats {
            chunk_count: chunk_count as usize,
            document_count: document_count as usize,
            duplicate_chunks: (chunk_count - distinct_hashes) as usize,
            dimension: self.dimension,
            metric: DISTANCE_METRIC.to_string(),
            embedding_model: self.embedding_model.clone(),
        })
    }
}

/// Cosine similarity in [-1, 1]; zero-length vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(RagError::StoreUnavailable(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
