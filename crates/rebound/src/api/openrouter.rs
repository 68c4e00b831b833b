//! Server-Sent Events (SSE) transport for the OpenRouter chat completions API.
//!
//! [`OpenRouterClient`] implements [`StreamFn`] so it can be handed straight to
//! the controller. The body is read incrementally with `Response::chunk()` so
//! long generations never hit a single-body timeout, and the `finish_reason`
//! of the final chunk decides whether the attempt is reported as truncated.

use super::streaming::{MessageStream, StreamFn};
use crate::logging::log_chunked;
use crate::{
    CompletionOptions, FINISH_REASON_LENGTH, Message, MessageContent, MessageRole, OPENROUTER_URL,
    StreamError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{Level, debug, trace, warn};

/// Widest line the request payload is logged with at `TRACE`.
const PAYLOAD_LOG_WIDTH: usize = 400;

/// How streamed text is surfaced to the consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Granularity {
    /// One assistant message per text delta, followed by a content-less
    /// message carrying the finish reason.
    ///
    /// The truncation flag only arrives on that last message, so under a
    /// controller with auto-expansion on, the deltas of an abandoned attempt
    /// have already reached the consumer when the retry starts. Use it only
    /// for passthrough runs or consumers that reset on a status message.
    Deltas,
    /// A single assistant message with the full text and the finish reason,
    /// emitted when the stream ends. A truncated attempt is swallowed whole.
    #[default]
    Complete,
}

// ── Wire types ─────────────────────────────────────────────────────

/// A message as sent to the API: controller-only fields stay local.
#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a MessageRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: &m.role,
            content: m.content.as_ref(),
            name: m.name.as_deref(),
            tool_call_id: m.tool_call_id.as_deref(),
        }
    }
}

/// Raw SSE data chunk.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    choices: Option<Vec<StreamChoice>>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct StreamDelta {
    content: Option<String>,
}

/// Build the JSON request body: options (with passthrough fields flattened),
/// the conversation, and `stream: true`.
pub(crate) fn request_body(
    messages: &[Message],
    options: &CompletionOptions,
) -> Result<serde_json::Value, StreamError> {
    let mut body = serde_json::to_value(options)?;
    let wire: Vec<WireMessage<'_>> = messages.iter().map(WireMessage::from).collect();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("messages".into(), serde_json::to_value(wire)?);
        obj.insert("stream".into(), serde_json::Value::Bool(true));
    }
    Ok(body)
}

// ── SSE decoding ───────────────────────────────────────────────────

/// A decoded SSE event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    TextDelta(String),
    Finish(String),
    Done,
}

/// Incremental line decoder. Bytes may split lines (and UTF-8 sequences)
/// anywhere, so partial input stays buffered until its newline arrives.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.pending.extend_from_slice(bytes);
        while let Some(newline_pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline_pos).collect();
            self.parse_line(&String::from_utf8_lossy(&line), &mut events);
            if self.done {
                break;
            }
        }
        events
    }

    /// Flush an unterminated final line.
    pub(crate) fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.done && !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.parse_line(&String::from_utf8_lossy(&rest), &mut events);
        }
        events
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    fn parse_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        let line = line.trim();
        if line.is_empty() || line.starts_with(':') {
            return;
        }
        if line == "data: [DONE]" {
            self.done = true;
            events.push(SseEvent::Done);
            return;
        }
        if let Some(data) = line.strip_prefix("data: ") {
            parse_sse_data(data, events);
        }
    }
}

/// Parse a single SSE `data:` payload into events.
fn parse_sse_data(data: &str, events: &mut Vec<SseEvent>) {
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            for choice in chunk.choices.unwrap_or_default() {
                if let Some(content) = choice.delta.and_then(|d| d.content)
                    && !content.is_empty()
                {
                    events.push(SseEvent::TextDelta(content));
                }
                if let Some(reason) = choice.finish_reason {
                    trace!("Stream finish_reason: {reason}");
                    events.push(SseEvent::Finish(reason));
                }
            }
        }
        Err(e) => {
            warn!("Failed to parse SSE chunk: {e} (data: {data})");
        }
    }
}

/// Turns decoded events into messages according to the [`Granularity`].
#[derive(Debug)]
pub(crate) struct Assembly {
    granularity: Granularity,
    text: String,
    finish_reason: Option<String>,
}

impl Assembly {
    pub(crate) fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            text: String::new(),
            finish_reason: None,
        }
    }

    pub(crate) fn accept(&mut self, event: SseEvent) -> Option<Message> {
        match event {
            SseEvent::TextDelta(delta) => match self.granularity {
                Granularity::Deltas => Some(Message::assistant_text(delta)),
                Granularity::Complete => {
                    self.text.push_str(&delta);
                    None
                }
            },
            SseEvent::Finish(reason) => {
                self.finish_reason = Some(reason);
                None
            }
            SseEvent::Done => None,
        }
    }

    /// The closing message. A missing finish reason is reported as `stop`.
    pub(crate) fn finish(self) -> Message {
        let reason = self.finish_reason.unwrap_or_else(|| "stop".into());
        let truncated = reason == FINISH_REASON_LENGTH;
        match self.granularity {
            Granularity::Deltas => Message::assistant_finish(reason, truncated),
            Granularity::Complete => Message::assistant_text(self.text)
                .with_finish_reason(reason)
                .with_truncated(truncated),
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

/// Async streaming client for the OpenRouter (OpenAI-compatible) API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
    url: String,
    granularity: Granularity,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, StreamError> {
        Self::with_headers(api_key, "https://github.com/rebound-rs", "rebound")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .user_agent("rebound/0.1")
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
            url: OPENROUTER_URL.to_string(),
            granularity: Granularity::default(),
        })
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }
}

impl StreamFn for OpenRouterClient {
    fn stream(&self, messages: Vec<Message>, options: CompletionOptions) -> MessageStream<'_> {
        Box::pin(async_stream::stream! {
            let body = match request_body(&messages, &options) {
                Ok(body) => body,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            debug!(
                "Sending streaming chat request: model={}, messages={}, max_tokens={:?}",
                options.model.as_deref().unwrap_or("(none)"),
                messages.len(),
                options.max_tokens,
            );
            log_chunked(Level::TRACE, "request", &body.to_string(), PAYLOAD_LOG_WIDTH);

            let sent = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("HTTP-Referer", &self.referer)
                .header("X-Title", &self.title)
                .json(&body)
                .send()
                .await;
            let mut resp = match sent {
                Ok(resp) => resp,
                Err(e) => {
                    yield Err(StreamError::from(e));
                    return;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                yield Err(StreamError::Status { status, body });
                return;
            }

            let mut decoder = SseDecoder::default();
            let mut assembly = Assembly::new(self.granularity);
            let mut chunks = 0usize;

            while !decoder.is_done() {
                let chunk = match resp.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(StreamError::from(e));
                        return;
                    }
                };
                chunks += 1;
                for event in decoder.push(&chunk) {
                    if let Some(message) = assembly.accept(event) {
                        yield Ok(message);
                    }
                }
            }
            for event in decoder.finish() {
                if let Some(message) = assembly.accept(event) {
                    yield Ok(message);
                }
            }

            let last = assembly.finish();
            debug!(
                "Stream completed after {chunks} chunk(s): finish_reason={:?}, truncated={}",
                last.finish_reason, last.truncated,
            );
            yield Ok(last);
        })
    }
}
