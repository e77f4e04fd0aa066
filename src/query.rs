//! Question answering over the index
//!
//! Embed the question, retrieve the nearest chunks, build a grounded prompt
//! and relay the generated answer token by token.

use crate::error::{Result, RagError};
use crate::generation::{GenerationService, TokenStream};
use crate::index::LazyIndex;
use crate::storage::ScoredRecord;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Answer given when retrieval finds nothing; generation is not called
pub const NO_RESULTS_ANSWER: &str = "No relevant news found.";

/// Tokens buffered between the generation stream and a slow reader
const TOKEN_BUFFER: usize = 32;

/// A retrieved article backing the answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    pub score: f32,
}

impl From<&ScoredRecord> for Source {
    fn from(hit: &ScoredRecord) -> Self {
        Self {
            title: hit.record.metadata.title.clone(),
            url: hit.record.metadata.url.clone(),
            score: hit.score,
        }
    }
}

/// Fully collected answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Source>,
}

/// Incrementally delivered answer plus the ranked sources behind it.
///
/// Tokens arrive in generation order. A failure after streaming started is
/// delivered as a final `Err` item; tokens already received stand. Dropping
/// the stream stops the forwarding task and closes the upstream connection.
pub struct AnswerStream {
    sources: Vec<Source>,
    receiver: mpsc::Receiver<Result<String>>,
}

impl AnswerStream {
    fn fixed(text: &str) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        // Fresh channel with room for one item
        let _ = sender.try_send(Ok(text.to_string()));
        Self {
            sources: Vec::new(),
            receiver,
        }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Next token, or `None` once the answer is complete
    pub async fn next_token(&mut self) -> Option<Result<String>> {
        self.receiver.recv().await
    }

    /// Drain every token into a single answer
    pub async fn collect(mut self) -> Result<Answer> {
        let mut text = String::new();
        while let Some(token) = self.next_token().await {
            text.push_str(&token?);
        }
        Ok(Answer {
            text,
            sources: self.sources,
        })
    }
}

/// Retrieval-augmented question answering
pub struct QueryPipeline {
    index: Arc<LazyIndex>,
    generator: Arc<dyn GenerationService>,
    top_k: usize,
}

impl QueryPipeline {
    pub fn new(index: Arc<LazyIndex>, generator: Arc<dyn GenerationService>, top_k: usize) -> Self {
        Self {
            index,
            generator,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn generator(&self) -> &Arc<dyn GenerationService> {
        &self.generator
    }

    /// Answer `question` from the `top_k` closest chunks
    pub async fn query(&self, question: &str) -> Result<AnswerStream> {
        self.query_with_k(question, self.top_k).await
    }

    /// Answer `question` from the `k` closest chunks.
    ///
    /// Errors before the first token (embedding, retrieval, the generation
    /// request itself) are returned directly.
    pub async fn query_with_k(&self, question: &str, k: usize) -> Result<AnswerStream> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidInput("Question cannot be empty".to_string()));
        }
        if k == 0 {
            return Err(RagError::InvalidInput("top_k must be greater than 0".to_string()));
        }

        let index = self.index.get_index().await?;

        let query_vector = index.embed(question).await?;
        let results = index.search(query_vector, k).await?;

        if results.is_empty() {
            tracing::info!("No chunks retrieved for question, answering without generation");
            return Ok(AnswerStream::fixed(NO_RESULTS_ANSWER));
        }

        tracing::debug!(
            "Retrieved {} chunks (best score {:.3})",
            results.len(),
            results[0].score
        );

        let sources: Vec<Source> = results.iter().map(Source::from).collect();
        let prompt = build_prompt(&build_context(&results), question);

        let tokens = self.generator.generate(&prompt).await?;

        let (sender, receiver) = mpsc::channel(TOKEN_BUFFER);
        tokio::spawn(forward_tokens(tokens, sender));

        Ok(AnswerStream { sources, receiver })
    }
}

/// Relay generation output to the reader until it ends, fails, or the reader
/// goes away. Returning drops `tokens`, which closes the upstream request.
async fn forward_tokens(mut tokens: TokenStream, sender: mpsc::Sender<Result<String>>) {
    let mut forwarded = 0usize;

    loop {
        let item = tokio::select! {
            _ = sender.closed() => {
                tracing::debug!("Reader disconnected after {} tokens, stopping generation", forwarded);
                return;
            }
            item = tokens.next() => item,
        };

        let Some(item) = item else {
            tracing::debug!("Generation finished: {} tokens", forwarded);
            return;
        };

        let failed = item.is_err();
        if let Err(e) = &item {
            tracing::error!("Generation failed after {} tokens: {}", forwarded, e);
        }

        if sender.send(item.map_err(RagError::from)).await.is_err() {
            tracing::debug!("Reader disconnected after {} tokens, stopping generation", forwarded);
            return;
        }
        if failed {
            return;
        }
        forwarded += 1;
    }
}

/// Ranked results rendered as one context block
pub fn build_context(results: &[ScoredRecord]) -> String {
    results
        .iter()
        .map(|hit| format!("Source: {}\nSnippet: {}", hit.record.metadata.title, hit.record.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Prompt asking the model to answer only from the supplied snippets
pub fn build_prompt(context: &str, question: &str) -> String {
    format!(
        "You are a news assistant. Answer the question using only the news snippets below. \
         If the snippets do not contain the answer, say that the available news does not cover it.\n\n\
         News Snippets:\n{}\n\n\
         Question: {}\n\n\
         Answer:",
        context, question
    )
}
