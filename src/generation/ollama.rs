//! Ollama `/api/generate` client with NDJSON token streaming

use super::{GenerationError, GenerationService, TokenStream};
use crate::config::GenerationConfig;
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// One line of the streamed response body
#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for an Ollama server
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    probe_timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout(),
            probe_timeout: config.connect_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send_error(&self, e: reqwest::Error) -> GenerationError {
        if e.is_timeout() {
            GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            GenerationError::Transport(e.to_string())
        }
    }

    async fn start(&self, prompt: String) -> Result<TokenStream, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!("POST {} (model {}, {} prompt chars)", url, self.model, prompt.len());

        let request = self
            .http
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt: &prompt,
                stream: true,
            })
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Generation request failed: HTTP {}: {}", status, body);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(decode_stream(response.bytes_stream(), self.timeout).boxed())
    }

    async fn probe(&self) -> Result<(), GenerationError> {
        let response = self
            .http
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            return Err(GenerationError::Status {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(())
    }
}

impl GenerationService for OllamaClient {
    fn generate(&self, prompt: &str) -> BoxFuture<'_, Result<TokenStream, GenerationError>> {
        self.start(prompt.to_string()).boxed()
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), GenerationError>> {
        self.probe().boxed()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Splits a byte stream into complete `\n`-terminated lines, carrying
/// partial lines over to the next push.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; returns every line completed by them (without the newline)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let text = text.trim();
            if !text.is_empty() {
                lines.push(text.to_string());
            }
        }
        lines
    }

    /// Trailing data left when the stream ends without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

enum Fragment {
    Token(String),
    Skip,
}

fn parse_line(line: &str) -> Result<(Fragment, bool), GenerationError> {
    let chunk: GenerateChunk = serde_json::from_str(line)
        .map_err(|e| GenerationError::Decode(format!("{}: {}", e, line)))?;

    if let Some(message) = chunk.error {
        return Err(GenerationError::Upstream(message));
    }

    let fragment = if chunk.response.is_empty() {
        Fragment::Skip
    } else {
        Fragment::Token(chunk.response)
    };
    Ok((fragment, chunk.done))
}

type Body<B, E> = Pin<Box<dyn Stream<Item = Result<B, E>> + Send>>;

struct DecodeState<B, E> {
    body: Body<B, E>,
    decoder: LineDecoder,
    pending: VecDeque<String>,
    idle_timeout: Duration,
    body_ended: bool,
    finished: bool,
}

/// Turn a streamed NDJSON body into answer tokens.
///
/// Each wait for the next body chunk is bounded by `idle_timeout`. The stream
/// ends at `done: true` or at end of body; errors are yielded once, last.
pub(crate) fn decode_stream<S, B, E>(
    body: S,
    idle_timeout: Duration,
) -> impl Stream<Item = Result<String, GenerationError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: LineDecoder::new(),
        pending: VecDeque::new(),
        idle_timeout,
        body_ended: false,
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(line) = state.pending.pop_front() {
                match parse_line(&line) {
                    Ok((fragment, done)) => {
                        state.finished = done;
                        if let Fragment::Token(token) = fragment {
                            return Some((Ok(token), state));
                        }
                        continue;
                    }
                    Err(e) => {
                        state.finished = true;
                        return Some((Err(e), state));
                    }
                }
            }

            if state.body_ended {
                return None;
            }

            match tokio::time::timeout(state.idle_timeout, state.body.next()).await {
                Err(_) => {
                    state.finished = true;
                    let secs = state.idle_timeout.as_secs();
                    return Some((Err(GenerationError::Timeout { secs }), state));
                }
                Ok(None) => {
                    state.body_ended = true;
                    if let Some(rest) = state.decoder.finish() {
                        state.pending.push_back(rest);
                    }
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    return Some((Err(GenerationError::Transport(e.to_string())), state));
                }
                Ok(Some(Ok(bytes))) => {
                    let lines = state.decoder.push(bytes.as_ref());
                    state.pending.extend(lines);
                }
            }
        }
    })
}
