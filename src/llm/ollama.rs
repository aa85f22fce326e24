//! Ollama chat client
//!
//! Posts to `/api/chat` with `stream: true`. The response body is
//! newline-delimited JSON, one object per line:
//!
//! ```text
//! {"message":{"role":"assistant","content":"It's"},"done":false}
//! {"message":{"role":"assistant","content":" three"},"done":false}
//! {"message":{"role":"assistant","content":""},"done":true}
//! ```

use std::fmt::Display;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{ChatModel, FragmentStream};
use crate::context::{ChatMessage, ContextWindow};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// One decoded stream line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChunk {
    pub content: String,
    pub done: bool,
}

/// Parse a single NDJSON line from the chat stream
///
/// # Errors
///
/// Returns `Error::ModelUnavailable` for malformed lines and for lines
/// carrying an `error` field
pub fn parse_chunk_line(line: &str) -> Result<ParsedChunk> {
    let chunk: ChatChunk = serde_json::from_str(line)
        .map_err(|e| Error::ModelUnavailable(format!("malformed stream chunk: {e}")))?;

    if let Some(error) = chunk.error {
        return Err(Error::ModelUnavailable(error));
    }

    Ok(ParsedChunk {
        content: chunk.message.map(|m| m.content).unwrap_or_default(),
        done: chunk.done,
    })
}

/// Splits a byte stream into complete lines
///
/// Lines may be split across network chunks; partial lines are held until
/// their newline arrives.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    /// Feed bytes and return every line they complete (blank lines skipped)
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Take whatever remains after the stream ended without a final newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = String::from_utf8_lossy(&rest).trim().to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Turn a raw chat response body into reply fragments
///
/// Empty fragments are skipped. The stream ends after the chunk marked
/// `done`; a body that ends before that yields `Error::ModelUnavailable`.
pub fn fragments<S, B, E>(body: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    try_stream! {
        let mut body = std::pin::pin!(body);
        let mut decoder = NdjsonDecoder::default();
        let mut finished = false;

        while !finished {
            let Some(bytes) = body.next().await else {
                break;
            };
            let bytes = bytes.map_err(|e| Error::ModelUnavailable(e.to_string()))?;

            for line in decoder.push(bytes.as_ref()) {
                let chunk = parse_chunk_line(&line)?;
                if !chunk.content.is_empty() {
                    yield chunk.content;
                }
                if chunk.done {
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            if let Some(line) = decoder.finish() {
                let chunk = parse_chunk_line(&line)?;
                if !chunk.content.is_empty() {
                    yield chunk.content;
                }
                finished = chunk.done;
            }
        }

        if !finished {
            Err::<(), _>(Error::ModelUnavailable(
                "stream ended before completion".to_string(),
            ))?;
        }
    }
}

/// Streaming client for a local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`)
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the URL is invalid
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("api/chat"))
            .map_err(|e| Error::Config(format!("invalid Ollama URL {base_url:?}: {e}")))?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            model: model.into(),
        })
    }

    /// The chat endpoint requests are sent to
    #[must_use]
    pub const fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait(?Send)]
impl ChatModel for OllamaClient {
    async fn stream_chat(&self, window: &ContextWindow) -> Result<FragmentStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: window.messages(),
            stream: true,
        };

        tracing::debug!(
            model = %self.model,
            messages = window.len(),
            "starting chat stream"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ChatChunk>(&body)
                .ok()
                .and_then(|chunk| chunk.error)
                .unwrap_or_else(|| body.trim().to_string());
            return Err(Error::ModelUnavailable(format!("{status}: {detail}")));
        }

        Ok(fragments(response.bytes_stream()).boxed_local())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn body(parts: &[&str]) -> impl Stream<Item = std::result::Result<Vec<u8>, std::io::Error>> {
        let parts: Vec<_> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(parts)
    }

    async fn collect(parts: &[&str]) -> Vec<Result<String>> {
        fragments(body(parts)).collect().await
    }

    #[test]
    fn test_parse_chunk_line() {
        let chunk =
            parse_chunk_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
                .unwrap();
        assert_eq!(chunk.content, "Hi");
        assert!(!chunk.done);

        let last = parse_chunk_line(r#"{"done":true,"total_duration":123}"#).unwrap();
        assert!(last.content.is_empty());
        assert!(last.done);
    }

    #[test]
    fn test_parse_error_chunk() {
        let err = parse_chunk_line(r#"{"error":"model 'llama9' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("llama9"));
    }

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = NdjsonDecoder::default();
        assert!(decoder.push(b"{\"done\":").is_empty());
        assert_eq!(decoder.push(b"false}\n\n{\"do"), vec!["{\"done\":false}"]);
        assert_eq!(decoder.finish().as_deref(), Some("{\"do"));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_fragments_in_order() {
        let items = collect(&[
            "{\"message\":{\"content\":\"It's\"},\"done\":false}\n{\"message\":{\"con",
            "tent\":\" three o'clock.\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}\n",
        ])
        .await;

        let text: Vec<String> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(text, vec!["It's", " three o'clock."]);
    }

    #[tokio::test]
    async fn test_final_line_without_newline() {
        let items = collect(&[
            "{\"message\":{\"content\":\"Hello\"},\"done\":false}\n",
            "{\"message\":{\"content\":\"\"},\"done\":true}",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_truncated_stream_is_an_error() {
        let items = collect(&["{\"message\":{\"content\":\"Hel\"},\"done\":false}\n"]).await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Error::ModelUnavailable(_))));
    }

    #[tokio::test]
    async fn test_error_line_ends_stream() {
        let items = collect(&[
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n",
            "{\"error\":\"out of memory\"}\n",
            "{\"message\":{\"content\":\"b\"},\"done\":false}\n",
        ])
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[test]
    fn test_endpoint_join() {
        let client = OllamaClient::new("http://localhost:11434", "llama3").unwrap();
        assert_eq!(client.endpoint().as_str(), "http://localhost:11434/api/chat");

        let client = OllamaClient::new("http://gpu-box:8080/ollama/", "llama3").unwrap();
        assert_eq!(client.endpoint().as_str(), "http://gpu-box:8080/ollama/api/chat");

        assert!(OllamaClient::new("not a url", "llama3").is_err());
    }
}
