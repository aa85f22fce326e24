//! Language model access
//!
//! A [`ChatModel`] turns a [`ContextWindow`] into a stream of text
//! fragments. The session prints fragments as they arrive and
//! [`accumulate`]s them into the full reply.

mod ollama;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::LocalBoxStream;

pub use ollama::{NdjsonDecoder, OllamaClient, ParsedChunk, fragments, parse_chunk_line};

use crate::Result;
use crate::context::ContextWindow;

/// Stream of reply fragments; ends after the final fragment or the first error
pub type FragmentStream = LocalBoxStream<'static, Result<String>>;

/// Chat-capable language model
#[async_trait(?Send)]
pub trait ChatModel {
    /// Start a streamed chat completion for `window`
    ///
    /// # Errors
    ///
    /// Returns `Error::ModelUnavailable` if the request cannot be started
    async fn stream_chat(&self, window: &ContextWindow) -> Result<FragmentStream>;

    /// Model name for logs
    fn name(&self) -> &str;
}

/// Drain `stream`, passing each fragment to `on_fragment`, and return the
/// concatenated reply
///
/// # Errors
///
/// Returns the first error the stream yields; fragments seen before it are
/// discarded
pub async fn accumulate(
    mut stream: FragmentStream,
    mut on_fragment: impl FnMut(&str),
) -> Result<String> {
    let mut reply = String::new();
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        reply.push_str(&fragment);
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_accumulate_concatenates_in_order() {
        let stream = stream::iter(vec![
            Ok("It's ".to_string()),
            Ok("three ".to_string()),
            Ok("o'clock.".to_string()),
        ])
        .boxed_local();

        let mut seen = Vec::new();
        let reply = accumulate(stream, |f| seen.push(f.to_string())).await.unwrap();

        assert_eq!(reply, "It's three o'clock.");
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_accumulate_stops_at_error() {
        let stream = stream::iter(vec![
            Ok("partial".to_string()),
            Err(Error::ModelUnavailable("connection reset".into())),
            Ok("never".to_string()),
        ])
        .boxed_local();

        let result = accumulate(stream, |_| {}).await;
        assert!(matches!(result, Err(Error::ModelUnavailable(_))));
    }
}
