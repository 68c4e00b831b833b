//! Convenience re-exports for common `rebound` types.
//!
//! ```ignore
//! use rebound::prelude::*;
//! ```
//!
//! Pulls in what a typical caller needs: the message model, the controller
//! and its config, the [`StreamFn`] capability with the bundled transport,
//! and the cancellation token type. Compaction internals, SSE decoding and
//! the log capture layer are left out; import those from their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{CompletionOptions, ContentPart, Message, MessageContent, MessageRole, StreamError};

// ── Controller ──────────────────────────────────────────────────────
pub use crate::controller::{ResilienceConfig, Resilient, StatusKind, run};

// ── Transport ───────────────────────────────────────────────────────
pub use crate::api::{
    FnStream, Granularity, MessageStream, OpenRouterClient, RetryConfig, Retrying, StreamFn,
};

// ── Cancellation ────────────────────────────────────────────────────
pub use tokio_util::sync::CancellationToken;
