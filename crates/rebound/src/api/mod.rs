//! Transport boundary: the streaming capability, a concrete backend, and retry.
//!
//! Everything between the [`controller`](crate::controller) and an LLM backend
//! lives here:
//!
//! - [`streaming`]: the [`StreamFn`] capability the controller drives, the
//!   [`MessageStream`] type it produces, and the [`FnStream`] closure adapter.
//! - [`openrouter`]: SSE transport for the OpenRouter chat completions API.
//!   Reports `finish_reason: "length"` as a truncated assistant message.
//! - [`retry`]: transient error detection (429, 5xx, network timeouts) with
//!   exponential backoff and jitter, as a [`StreamFn`] decorator. Never
//!   retries 400/401 errors or anything after the first message.

pub mod openrouter;
pub mod retry;
pub mod streaming;

// Re-export commonly used items at the module level.
pub use openrouter::{Granularity, OpenRouterClient};
pub use retry::{RetryConfig, Retrying};
pub use streaming::{FnStream, MessageStream, StreamFn};
