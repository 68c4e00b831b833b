//! Adaptive streaming completion controller for LLM backends.
//!
//! `rebound` drives a single logical "ask the model for a response" operation
//! on top of any token-streaming transport and makes it resilient to the two
//! budget failures real backends hit all the time:
//!
//! - the response is cut off because the output-token budget ran out, and
//! - the conversation grew too large for the input-token budget.
//!
//! The core abstraction is [`controller::run`]: a lazy, cancelable stream of
//! [`Message`] values that privately retries the call with a larger
//! `max_tokens`, compacts the conversation at most once, and forwards only
//! content from attempts that actually finished.
//!
//! # Getting started
//!
//! ```ignore
//! use rebound::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), StreamError> {
//!     let api_key = std::env::var("OPENROUTER_KEY").unwrap();
//!     // One message per finished attempt; truncated attempts never surface.
//!     let client = OpenRouterClient::new(api_key)?;
//!
//!     let config = ResilienceConfig::default()
//!         .with_baseline_max_tokens(1024)
//!         .with_token_ceiling(8192)
//!         .with_diagnostics(true);
//!
//!     let options = CompletionOptions::new("anthropic/claude-sonnet-4").with_max_tokens(1024);
//!     let messages = vec![
//!         Message::system("You are a helpful coding assistant."),
//!         Message::user("Explain the borrow checker in depth."),
//!     ];
//!
//!     let mut stream = run(messages, CancellationToken::new(), options, &client, config);
//!     while let Some(message) = stream.next().await {
//!         let message = message?;
//!         match message.status_kind() {
//!             Some(kind) => eprintln!("[{kind}] {}", message.text()),
//!             None => print!("{}", message.text()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`controller`] | [`run`](controller::run), [`ResilienceConfig`](controller::ResilienceConfig), per-run state machine, status messages |
//! | [`context`] | Conversation [`compact`](context::compact)ion into one synthetic summary message |
//! | [`api`] | [`StreamFn`](api::StreamFn) capability, OpenRouter SSE transport, transport retry |
//! | [`logging`] | Chunked `tracing` emission and a capture layer for host UIs |

pub mod api;
pub mod context;
pub mod controller;
pub mod error;
pub mod logging;
pub mod prelude;

use serde::{Deserialize, Serialize};

pub use error::StreamError;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Finish reason reported by OpenAI-compatible backends when the output-token
/// budget ran out.
pub const FINISH_REASON_LENGTH: &str = "length";

// ── Message types ──────────────────────────────────────────────────

/// Role of a message in the conversation.
///
/// Roles this crate does not interpret (`developer`, `function`, ...) keep
/// their original string so they go back on the wire unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    Other(String),
}

impl MessageRole {
    pub fn as_str(&self) -> &str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Other(role) => role,
        }
    }
}

impl From<String> for MessageRole {
    fn from(role: String) -> Self {
        match role.as_str() {
            "system" => MessageRole::System,
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            "tool" => MessageRole::Tool,
            _ => MessageRole::Other(role),
        }
    }
}

impl Serialize for MessageRole {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageRole {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(MessageRole::from)
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed part of a structured message body.
///
/// Only `text` parts carry meaning for this crate; every other field is kept
/// as-is so provider-specific parts (images, cache hints) survive untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

/// Message body: a plain string, a list of typed parts, or anything else a
/// backend sent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    Other(serde_json::Value),
}

impl MessageContent {
    /// Flatten the content to plain text.
    ///
    /// Strings are returned as-is, parts contribute the concatenated text of
    /// their `text`-typed entries, and any other shape falls back to a single
    /// top-level `text` field when one is present.
    pub fn flatten(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.is_text())
                .filter_map(|p| p.text.as_deref())
                .collect(),
            MessageContent::Other(value) => value
                .get("text")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A message in the conversation.
///
/// Assistant messages coming back from a transport may carry a `truncated`
/// flag (the output budget ran out) and a `finish_reason` tag. Synthetic
/// status messages produced by the controller use `finish_reason` for their
/// [`StatusKind`](controller::StatusKind) tag.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            truncated: false,
            finish_reason: None,
            name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant_text(content: impl Into<MessageContent>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// An assistant message with no body, used by transports to report how a
    /// stream ended.
    pub fn assistant_finish(finish_reason: impl Into<String>, truncated: bool) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: None,
            truncated,
            finish_reason: Some(finish_reason.into()),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// Flattened text content (empty when there is none).
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(MessageContent::flatten)
            .unwrap_or_default()
    }

    /// Whether the transport marked this as an assistant response cut off by
    /// the output-token budget.
    pub fn is_truncated_assistant(&self) -> bool {
        self.role == MessageRole::Assistant && self.truncated
    }
}

// ── Request options ────────────────────────────────────────────────

/// Per-call completion options handed to a [`StreamFn`](api::StreamFn).
///
/// `model` and `max_tokens` are the only fields the controller reads;
/// `extra` carries provider-specific passthrough fields and is flattened into
/// the request body untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CompletionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CompletionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set a provider-specific passthrough field.
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}
