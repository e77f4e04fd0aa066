//! Overlapping fixed-size text windows
//!
//! Sizes are measured in characters (Unicode scalar values), so a window
//! boundary never lands inside a UTF-8 sequence.

use crate::config::ChunkingConfig;
use crate::error::{Result, RagError};

/// Validated window parameters: `0 < overlap < max_size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_size: usize,
    overlap: usize,
}

/// A contiguous span of a document's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub source_title: String,
    pub source_url: String,
    /// Sequence position within the source document
    pub position: usize,
    /// Character offset of the first character in the source content
    pub start: usize,
}

impl Chunk {
    /// Number of characters in this chunk
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

impl Chunker {
    pub fn new(max_size: usize, overlap: usize) -> Result<Self> {
        if overlap == 0 || overlap >= max_size {
            return Err(RagError::Chunking(format!(
                "overlap must satisfy 0 < overlap < max_size (overlap={}, max_size={})",
                overlap, max_size
            )));
        }
        Ok(Self { max_size, overlap })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.max_size, config.overlap)
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between consecutive window starts
    pub fn step(&self) -> usize {
        self.max_size - self.overlap
    }

    /// Window spans as `(start, end)` character offsets.
    ///
    /// The walk stops at the first window that reaches the end of the text,
    /// so the last window is the only one that may be shorter than
    /// `max_size`. Empty input yields no windows.
    pub fn windows(&self, char_len: usize) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut start = 0;

        while start < char_len {
            let end = (start + self.max_size).min(char_len);
            spans.push((start, end));
            if end == char_len {
                break;
            }
            start += self.step();
        }

        spans
    }

    /// Split raw text into window strings
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let boundaries = char_boundaries(text);
        let char_len = boundaries.len() - 1;

        self.windows(char_len)
            .into_iter()
            .map(|(start, end)| text[boundaries[start]..boundaries[end]].to_string())
            .collect()
    }

    /// Split a document's content into chunks carrying its title and url
    pub fn split(&self, text: &str, title: &str, url: &str) -> Vec<Chunk> {
        let boundaries = char_boundaries(text);
        let char_len = boundaries.len() - 1;

        self.windows(char_len)
            .into_iter()
            .enumerate()
            .map(|(position, (start, end))| Chunk {
                text: text[boundaries[start]..boundaries[end]].to_string(),
                source_title: title.to_string(),
                source_url: url.to_string(),
                position,
                start,
            })
            .collect()
    }
}

/// Byte offset of every char boundary, including the end of the string
fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}
