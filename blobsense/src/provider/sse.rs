//! Decoding of OpenAI-style server-sent events into text fragments.

use super::ProviderError;
use async_openai::types::chat::CreateChatCompletionStreamResponse;
use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Deserialize;

/// One `data:` payload of a chat completion stream.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
#[allow(clippy::large_enum_variant)]
enum StreamEvent {
    Chunk(CreateChatCompletionStreamResponse),
    Error { error: ErrorBody },
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorBody {
    pub message: String,
}

/// Result of inspecting a single SSE line.
#[derive(Debug)]
enum SseLine {
    /// Blank lines, comments and non-data fields
    Skip,
    /// The `[DONE]` terminator
    Done,
    Fragment(Result<String, ProviderError>),
}

fn parse_line(line: &[u8]) -> SseLine {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();

    // Handle both "data: value" and "data:value"
    let Some(data) = trimmed.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(StreamEvent::Chunk(chunk)) => SseLine::Fragment(Ok(chunk
            .choices
            .iter()
            .filter_map(|choice| choice.delta.content.as_deref())
            .collect())),
        Ok(StreamEvent::Error { error }) => SseLine::Fragment(Err(ProviderError::Upstream { message: error.message })),
        Err(e) => SseLine::Fragment(Err(ProviderError::MalformedEvent(e.to_string()))),
    }
}

struct DecoderState<E> {
    upstream: BoxStream<'static, Result<Bytes, E>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Turn a raw SSE byte stream into one fragment per chunk event.
///
/// Lines are split on raw bytes so multi-byte characters spanning network chunks are reassembled
/// before decoding. The stream ends at `[DONE]`, at upstream end-of-stream, or right after the
/// first error it yields.
pub(super) fn decode_fragments<S, E>(upstream: S) -> impl Stream<Item = Result<String, ProviderError>> + Send + 'static
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ProviderError> + Send + 'static,
{
    let state = DecoderState {
        upstream: upstream.boxed(),
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            if let Some(newline) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=newline).collect();
                match parse_line(&line) {
                    SseLine::Skip => continue,
                    SseLine::Done => return None,
                    SseLine::Fragment(fragment) => {
                        state.finished = fragment.is_err();
                        return Some((fragment, state));
                    }
                }
            }

            match state.upstream.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    // Flush a final event that was not newline-terminated
                    state.finished = true;
                    let line = std::mem::take(&mut state.buffer);
                    return match parse_line(&line) {
                        SseLine::Fragment(fragment) => Some((fragment, state)),
                        SseLine::Skip | SseLine::Done => None,
                    };
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {{\"id\":\"chatcmpl-123\",\"object\":\"chat.completion.chunk\",\"created\":1677652288,\"model\":\"gpt-4\",\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    async fn decode(parts: Vec<Vec<u8>>) -> Vec<Result<String, ProviderError>> {
        let upstream = stream::iter(parts.into_iter().map(|p| Ok::<_, ProviderError>(Bytes::from(p))));
        decode_fragments(upstream).collect().await
    }

    #[tokio::test]
    async fn yields_one_fragment_per_chunk_until_done() {
        let body = format!("{}: keep-alive\n\n{}data: [DONE]\n\n{}", chunk("Hel"), chunk("lo"), chunk("ignored"));
        let fragments = decode(vec![body.into_bytes()]).await;

        let texts: Vec<String> = fragments.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_network_chunks() {
        let body = chunk("zażółć");
        let bytes = body.into_bytes();
        // Split inside the multi-byte 'ż'
        let split = bytes.iter().position(|b| *b == 0xC5).unwrap() + 1;
        let (head, tail) = bytes.split_at(split);

        let fragments = decode(vec![head.to_vec(), tail.to_vec()]).await;
        let texts: Vec<String> = fragments.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["zażółć"]);
    }

    #[tokio::test]
    async fn role_only_chunks_yield_empty_fragments() {
        let role_chunk = "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"gpt-4\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        let fragments = decode(vec![role_chunk.as_bytes().to_vec()]).await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "");
    }

    #[tokio::test]
    async fn error_event_terminates_the_stream() {
        let body = format!(
            "{}data: {{\"error\":{{\"message\":\"overloaded\",\"type\":\"server_error\"}}}}\n\n{}",
            chunk("partial"),
            chunk("never")
        );
        let fragments = decode(vec![body.into_bytes()]).await;

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].as_ref().unwrap(), "partial");
        assert!(matches!(&fragments[1], Err(ProviderError::Upstream { message }) if message == "overloaded"));
    }

    #[tokio::test]
    async fn malformed_event_is_an_error() {
        let fragments = decode(vec![b"data: {not json}\n\n".to_vec()]).await;
        assert_eq!(fragments.len(), 1);
        assert!(matches!(fragments[0], Err(ProviderError::MalformedEvent(_))));
    }

    #[tokio::test]
    async fn trailing_event_without_newline_is_flushed() {
        let body = chunk("last");
        let fragments = decode(vec![body.trim_end().as_bytes().to_vec()]).await;
        let texts: Vec<String> = fragments.into_iter().map(Result::unwrap).collect();
        assert_eq!(texts, vec!["last"]);
    }
}
