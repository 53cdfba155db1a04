//! OpenAI-compatible chat-completions provider (streaming).
//!
//! Talks plain HTTP through `reqwest` so any compatible server works (OpenAI,
//! vLLM, llama.cpp, Lemonade). Server-sent events are decoded line by line:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Bon"}}]}
//! data: {"choices":[{"delta":{"content":"jour"}}]}
//! data: [DONE]
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::prompt::{SYSTEM_PROMPT, render_user_prompt};
use super::{ChunkStream, GenerationError, GenerationRequest, GenerationResult, Generator};
use crate::cancel::SyncToken;

/// Streaming client for `/chat/completions`.
pub struct OpenAiGenerator {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request body for a generation request.
    pub fn body(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.model,
            "stream": true,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": render_user_prompt(request) },
            ],
        })
    }
}

fn status_error(status: StatusCode, text: &str) -> GenerationError {
    let snippet: String = text.chars().take(200).collect();
    let msg = format!("{status}: {snippet}");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenerationError::Auth(msg),
        StatusCode::TOO_MANY_REQUESTS => GenerationError::RateLimited(msg),
        StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
            GenerationError::InvalidRequest(msg)
        }
        _ => GenerationError::Api(msg),
    }
}

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SseEvent {
    Data(String),
    Done,
}

/// Incremental SSE line decoder. Buffers bytes so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = Self::parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Whatever is left once the body ends without a trailing newline.
    fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buf);
        Self::parse_line(&line)
    }

    fn parse_line(line: &[u8]) -> Option<SseEvent> {
        let line = String::from_utf8_lossy(line);
        let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            Some(SseEvent::Done)
        } else if data.is_empty() {
            None
        } else {
            Some(SseEvent::Data(data.to_string()))
        }
    }
}

/// Text delta of one `chat.completion.chunk`; `None` for role/stop frames.
fn parse_delta(data: &str) -> GenerationResult<Option<String>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| GenerationError::InvalidResponse(format!("bad chunk json: {e}")))?;
    if let Some(err) = value.get("error") {
        let msg = err["message"].as_str().unwrap_or("unknown error").to_string();
        return Err(GenerationError::Api(msg));
    }
    Ok(value["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string))
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: SseDecoder,
    pending: VecDeque<GenerationResult<String>>,
    finished: bool,
}

impl SseState {
    /// Queue the outcome of one event; returns false when the stream is over.
    fn accept(&mut self, event: SseEvent) -> bool {
        match event {
            SseEvent::Done => false,
            SseEvent::Data(data) => match parse_delta(&data) {
                Ok(Some(text)) => {
                    self.pending.push_back(Ok(text));
                    true
                }
                Ok(None) => true,
                Err(e) => {
                    self.pending.push_back(Err(e));
                    false
                }
            },
        }
    }
}

fn decode_chunks(bytes: BoxStream<'static, Result<Vec<u8>, reqwest::Error>>) -> ChunkStream {
    let state = SseState {
        bytes,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(buf)) => {
                    for event in st.decoder.push(&buf) {
                        if !st.accept(event) {
                            st.finished = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(GenerationError::Network(e.to_string())), st));
                }
                None => {
                    st.finished = true;
                    if let Some(event) = st.decoder.finish() {
                        st.accept(event);
                    }
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        request: Arc<GenerationRequest>,
        token: SyncToken,
    ) -> GenerationResult<ChunkStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.http.post(&url).json(&self.body(&request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let send = token.run_until_cancelled(builder.send()).await;
        let Some(sent) = send else {
            debug!(model = %self.model, "request cancelled before response");
            return Ok(stream::empty().boxed());
        };
        let resp = sent.map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(model = %self.model, %status, "generation request rejected");
            return Err(status_error(status, &text));
        }

        let bytes = resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
        let cancelled = async move { token.cancelled().await };
        Ok(decode_chunks(bytes).take_until(cancelled).boxed())
    }
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use syncwright_types::{Languages, PartKind};

    fn byte_stream(parts: Vec<&'static [u8]>) -> BoxStream<'static, Result<Vec<u8>, reqwest::Error>> {
        stream::iter(parts.into_iter().map(|p| Ok(p.to_vec()))).boxed()
    }

    #[test]
    fn test_decoder_handles_split_lines_and_utf8() {
        let mut decoder = SseDecoder::default();
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"你好\"}}]}\n".as_bytes();
        let (a, b) = line.split_at(40);
        assert!(decoder.push(a).is_empty());
        let events = decoder.push(b);
        assert_eq!(events.len(), 1);
        let SseEvent::Data(data) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(parse_delta(data).unwrap().as_deref(), Some("你好"));

        assert_eq!(decoder.push(b": keepalive\n\ndata: [DONE]\n"), vec![SseEvent::Done]);
    }

    #[test]
    fn test_parse_delta_skips_role_frames_and_reports_errors() {
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert!(matches!(
            parse_delta(r#"{"error":{"message":"overloaded"}}"#),
            Err(GenerationError::Api(m)) if m == "overloaded"
        ));
        assert!(matches!(parse_delta("not json"), Err(GenerationError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_decode_chunks_until_done() {
        let bytes = byte_stream(vec![
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Bon\"}}]}\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"jour\"}}]}\n\ndata: [DONE]\n\n",
            b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ]);
        let chunks: Vec<String> = decode_chunks(bytes).try_collect().await.unwrap();
        assert_eq!(chunks, vec!["Bon", "jour"]);
    }

    #[tokio::test]
    async fn test_decode_chunks_flushes_unterminated_tail() {
        let bytes = byte_stream(vec![b"data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}"]);
        let chunks: Vec<String> = decode_chunks(bytes).try_collect().await.unwrap();
        assert_eq!(chunks, vec!["end"]);
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(StatusCode::UNAUTHORIZED, "no"), GenerationError::Auth(_)));
        assert!(matches!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), GenerationError::RateLimited(_)));
        assert!(matches!(status_error(StatusCode::BAD_GATEWAY, ""), GenerationError::Api(_)));
    }

    #[test]
    fn test_body_shape() {
        let generator = OpenAiGenerator::new("http://localhost:8000/v1/", "test-model");
        let request = GenerationRequest::new(PartKind::Source, "Hello.", Languages::default());
        let body = generator.body(&request);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(generator.base_url, "http://localhost:8000/v1");
    }
}
